//! Tests for the error system.

use convoy::error::*;

#[test]
fn error_api_creation() {
    let err = ConvoyError::api(404, "Not found");
    assert!(matches!(&err, ConvoyError::Api { status: 404, .. }));
    assert_eq!(err.to_string(), "API error (status 404): Not found");
}

#[test]
fn error_categories_are_stable_for_major_variants() {
    struct Case {
        error: ConvoyError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
    }

    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: ConvoyError::Authentication("bad-key".to_string()),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::RateLimited {
                retry_after_ms: Some(1000),
            },
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
        },
        Case {
            error: ConvoyError::api(503, "overloaded"),
            expected_category: ErrorCategory::Server,
            expected_retryable: true,
        },
        Case {
            error: ConvoyError::api(403, "forbidden"),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::Stream("eof".into()),
            expected_category: ErrorCategory::Network,
            expected_retryable: true,
        },
        Case {
            error: ConvoyError::Io(io_error),
            expected_category: ErrorCategory::ToolExecution,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::Serialization(serde_error),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::remote("docs", "gone"),
            expected_category: ErrorCategory::Remote,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::InvalidState("busy".into()),
            expected_category: ErrorCategory::State,
            expected_retryable: false,
        },
        Case {
            error: ConvoyError::Cancelled,
            expected_category: ErrorCategory::Cancelled,
            expected_retryable: false,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
    }
}

#[test]
fn tool_and_remote_errors_render_plainly() {
    assert_eq!(
        ConvoyError::tool("read_file", "No such file").to_string(),
        "No such file"
    );
    assert_eq!(
        ConvoyError::remote("docs", "connection reset").to_string(),
        "Remote tool server 'docs': connection reset"
    );
}
