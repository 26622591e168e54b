//! Known flash chip ids
//!
//! Exact match only: a candidate must equal a recorded id byte for byte,
//! so a different length never matches.

/// Recorded id patterns, in lookup order
pub const FLASH_TYPES: &[(&[u8], &str)] = &[
    (&[0x01, 0x00, 0x7e, 0x22, 0x22, 0x22, 0x01, 0x22], "S29GL256"),
    (&[0x89, 0x00, 0x7e, 0x22, 0x22, 0x22, 0x01, 0x22], "JS28F256"),
    (&[0x01, 0x00, 0x7e, 0x22, 0x28, 0x22, 0x01, 0x22], "S29GL01"),
    (&[0x01, 0x00, 0x7e, 0x22, 0x48, 0x22, 0x01, 0x22], "S70GL02"),
    (&[0xc2, 0xc2, 0xcb, 0xcb], "MX29LV640EB"),
    (&[0xc2, 0xc2, 0xc9, 0xc9], "MX29LV640ET"),
    (&[0xc2, 0xc2, 0x7e, 0x7e], "MX29LV640EB"),
    (&[0x01, 0x01, 0x7e, 0x7e], "S29GL256N"),
];

/// Name of the chip whose id equals `id`, if any
pub fn lookup(id: &[u8]) -> Option<&'static str> {
    FLASH_TYPES
        .iter()
        .find(|(pattern, _)| *pattern == id)
        .map(|(_, name)| *name)
}
