//! Configuration access port trait.
//!
//! Values come back raw; typed parsing and validation live in
//! `domain::config_validation` so bad values are reported, not defaulted.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Keys present in `section`, sorted. Empty when the section is absent.
    fn keys(&self, section: &str) -> Vec<String>;
}
