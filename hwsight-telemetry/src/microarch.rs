//! Microarchitecture names by vendor, family and model.

use crate::decode::parse_last_int;

/// Intel family 6 models.
const INTEL_FAMILY_6: &[(&[u64], &str)] = &[
    (&[42, 45], "Sandy Bridge"),
    (&[58, 62], "Ivy Bridge"),
    (&[60, 63, 69, 70], "Haswell"),
    (&[61, 71, 79, 86], "Broadwell"),
    (&[78, 94], "Skylake"),
    (&[85], "Skylake (Server)"),
    (&[142, 158], "Kaby Lake / Coffee Lake"),
    (&[165, 166], "Comet Lake"),
    (&[106, 108, 125, 126], "Ice Lake"),
    (&[140, 141], "Tiger Lake"),
    (&[151, 154], "Alder Lake"),
    (&[183, 186, 191], "Raptor Lake"),
    (&[143], "Sapphire Rapids"),
];

/// ARM implementer 0x41 part numbers.
const ARM_PARTS: &[(u64, &str)] = &[
    (0xd03, "Cortex-A53"),
    (0xd04, "Cortex-A35"),
    (0xd05, "Cortex-A55"),
    (0xd07, "Cortex-A57"),
    (0xd08, "Cortex-A72"),
    (0xd09, "Cortex-A73"),
    (0xd0a, "Cortex-A75"),
    (0xd0b, "Cortex-A76"),
    (0xd0c, "Neoverse-N1"),
    (0xd0d, "Cortex-A77"),
    (0xd40, "Neoverse-V1"),
    (0xd41, "Cortex-A78"),
    (0xd44, "Cortex-X1"),
    (0xd49, "Neoverse-N2"),
];

/// Look up the microarchitecture; `None` when the combination is not known.
///
/// `family` and `model` may be decimal or `0x` hex.
pub fn microarchitecture(vendor: &str, family: &str, model: &str) -> Option<&'static str> {
    let family_num = parse_last_int(family, u64::MAX);
    let model_num = parse_last_int(model, u64::MAX);

    if vendor.contains("Intel") {
        if family_num != 6 {
            return None;
        }
        return INTEL_FAMILY_6
            .iter()
            .find(|(models, _)| models.contains(&model_num))
            .map(|(_, name)| *name);
    }

    if vendor.contains("AMD") {
        return match (family_num, model_num) {
            (23, 0x30..=0x7F | 0x90..=0xAF) => Some("Zen 2"),
            (23, 0x08 | 0x18) => Some("Zen+"),
            (23, _) => Some("Zen"),
            (25, 0x10..=0x1F | 0x60..=0x7F | 0xA0..=0xAF) => Some("Zen 4"),
            (25, _) => Some("Zen 3"),
            (26, _) => Some("Zen 5"),
            (21, _) => Some("Bulldozer"),
            _ => None,
        };
    }

    match parse_last_int(vendor, u64::MAX) {
        0x41 => ARM_PARTS
            .iter()
            .find(|(part, _)| *part == model_num)
            .map(|(_, name)| *name),
        0x61 => Some("Apple"),
        _ if vendor.starts_with("Apple") => Some("Apple"),
        _ => None,
    }
}
