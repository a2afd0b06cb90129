//! Configuration access port trait.
//!
//! Typed getters fall back to `default` for absent or unparsable values;
//! `domain::config_validation` reads raw strings when it must tell the two
//! apart.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
