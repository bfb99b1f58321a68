//! ARKit-compatible channel table.
//!
//! The order here is the wire order of every `weights` array the service emits.

use std::ops::Range;

/// Number of control channels per frame.
pub const CHANNEL_COUNT: usize = 52;

/// Channel names in output order.
pub const BLENDSHAPE_NAMES: [&str; CHANNEL_COUNT] = [
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "noseSneerLeft",
    "noseSneerRight",
    "tongueOut",
];

/// Jaw and mouth channels: the speech-driven group that temporal smoothing operates on.
pub const MOUTH_CHANNELS: Range<usize> = 22..49;

/// Brow-raise channels used for synthetic secondary motion.
pub const BROW_RAISE_CHANNELS: [usize; 3] = [BROW_INNER_UP, BROW_OUTER_UP_LEFT, BROW_OUTER_UP_RIGHT];

pub const BROW_INNER_UP: usize = 2;
pub const BROW_OUTER_UP_LEFT: usize = 3;
pub const BROW_OUTER_UP_RIGHT: usize = 4;
pub const EYE_BLINK_LEFT: usize = 8;
pub const EYE_BLINK_RIGHT: usize = 9;
pub const JAW_OPEN: usize = 24;
pub const MOUTH_CLOSE: usize = 26;
pub const MOUTH_FUNNEL: usize = 31;
pub const MOUTH_LOWER_DOWN_LEFT: usize = 33;
pub const MOUTH_LOWER_DOWN_RIGHT: usize = 34;
pub const MOUTH_PUCKER: usize = 37;
pub const MOUTH_STRETCH_LEFT: usize = 45;
pub const MOUTH_STRETCH_RIGHT: usize = 46;
pub const MOUTH_UPPER_UP_LEFT: usize = 47;
pub const MOUTH_UPPER_UP_RIGHT: usize = 48;

/// Look up a channel index by name.
#[cfg(test)]
pub fn index_of(name: &str) -> Option<usize> {
    BLENDSHAPE_NAMES.iter().position(|&n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let unique: HashSet<_> = BLENDSHAPE_NAMES.iter().collect();
        assert_eq!(unique.len(), CHANNEL_COUNT);
    }

    #[test]
    fn test_named_indices_match_table() {
        assert_eq!(index_of("browInnerUp"), Some(BROW_INNER_UP));
        assert_eq!(index_of("browOuterUpLeft"), Some(BROW_OUTER_UP_LEFT));
        assert_eq!(index_of("browOuterUpRight"), Some(BROW_OUTER_UP_RIGHT));
        assert_eq!(index_of("eyeBlinkLeft"), Some(EYE_BLINK_LEFT));
        assert_eq!(index_of("eyeBlinkRight"), Some(EYE_BLINK_RIGHT));
        assert_eq!(index_of("jawOpen"), Some(JAW_OPEN));
        assert_eq!(index_of("mouthClose"), Some(MOUTH_CLOSE));
        assert_eq!(index_of("mouthFunnel"), Some(MOUTH_FUNNEL));
        assert_eq!(index_of("mouthLowerDownLeft"), Some(MOUTH_LOWER_DOWN_LEFT));
        assert_eq!(index_of("mouthLowerDownRight"), Some(MOUTH_LOWER_DOWN_RIGHT));
        assert_eq!(index_of("mouthPucker"), Some(MOUTH_PUCKER));
        assert_eq!(index_of("mouthStretchLeft"), Some(MOUTH_STRETCH_LEFT));
        assert_eq!(index_of("mouthStretchRight"), Some(MOUTH_STRETCH_RIGHT));
        assert_eq!(index_of("mouthUpperUpLeft"), Some(MOUTH_UPPER_UP_LEFT));
        assert_eq!(index_of("mouthUpperUpRight"), Some(MOUTH_UPPER_UP_RIGHT));
        assert_eq!(index_of("unknown"), None);
    }

    #[test]
    fn test_mouth_group_covers_jaw_and_mouth() {
        let names: Vec<&str> = MOUTH_CHANNELS.map(|i| BLENDSHAPE_NAMES[i]).collect();
        assert!(names.iter().all(|n| n.starts_with("jaw") || n.starts_with("mouth")));
        assert_eq!(names.first(), Some(&"jawForward"));
        assert_eq!(names.last(), Some(&"mouthUpperUpRight"));
    }
}
