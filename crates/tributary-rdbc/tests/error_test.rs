//! Unit tests for tributary-rdbc error module

use tributary_rdbc::error::{Error, ErrorCategory};

#[test]
fn test_categories() {
    assert_eq!(Error::connection("x").category(), ErrorCategory::Connection);
    assert_eq!(Error::query("x").category(), ErrorCategory::Query);
    assert_eq!(Error::timeout("x").category(), ErrorCategory::Timeout);
    assert_eq!(Error::config("x").category(), ErrorCategory::Configuration);
    assert_eq!(Error::schema("x").category(), ErrorCategory::Schema);
    assert_eq!(Error::unsupported("x").category(), ErrorCategory::Other);
    assert_eq!(
        Error::type_conversion("x").category(),
        ErrorCategory::TypeConversion
    );
}

#[test]
fn test_connection_error_keeps_source() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err = Error::connection_with_source("dial failed", io);

    assert!(err.is_retriable());
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_category_display() {
    assert_eq!(ErrorCategory::Connection.to_string(), "connection");
    assert_eq!(ErrorCategory::TypeConversion.to_string(), "type_conversion");
}
