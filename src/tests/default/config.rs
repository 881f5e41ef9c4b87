#![cfg(not(loom))]

use crate::{Config, config::parse_flag};

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.thread_name, "process");
    assert_eq!(config.stack_size, None);
    assert!(config.thread_safe_handles);
}

#[test]
fn test_config_builder() {
    let config = Config::default()
        .with_thread_name("render")
        .with_stack_size(1 << 20)
        .with_thread_safe_handles(false);
    assert_eq!(config.thread_name, "render");
    assert_eq!(config.stack_size, Some(1 << 20));
    assert!(!config.thread_safe_handles);
}

#[test]
fn test_config_flags() {
    assert_eq!(parse_flag("TRUE"), Some(true));
    assert_eq!(parse_flag(" off "), Some(false));
    assert_eq!(parse_flag("1"), Some(true));
    assert_eq!(parse_flag("maybe"), None);
}
