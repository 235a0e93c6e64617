//! Context codec
//!
//! A trace context travels as `<trace hex>-<span hex>`: lowercase, unpadded,
//! no `0x`. Decoding is case-insensitive. The parent span id never travels.

use super::context::{SpanId, TraceContext, TraceId};
use crate::error::FormatError;

/// Separator between the trace id and span id fields
pub const FIELD_SEPARATOR: char = '-';

/// Encodes the trace and span ids of `ctx` into a two-field suffix.
pub fn encode(ctx: &TraceContext) -> String {
    format!(
        "{:x}{}{:x}",
        ctx.trace_id.as_u128(),
        FIELD_SEPARATOR,
        ctx.span_id.as_u64()
    )
}

/// Decodes a two-field suffix into a parentless context.
pub fn decode(suffix: &str) -> Result<TraceContext, FormatError> {
    let fields: Vec<&str> = suffix.split(FIELD_SEPARATOR).collect();
    if fields.len() != 2 {
        return Err(FormatError::InvalidFieldCount {
            suffix: suffix.to_string(),
            found: fields.len(),
        });
    }
    decode_fields(fields[0], fields[1])
}

/// Decodes already-split trace and span fields.
pub fn decode_fields(trace: &str, span: &str) -> Result<TraceContext, FormatError> {
    let trace_id = parse_hex_u128("trace_id", trace)?;
    let span_id = parse_hex_u64("span_id", span)?;
    Ok(TraceContext::remote(TraceId::from_u128(trace_id), SpanId::from_u64(span_id)))
}

// `from_str_radix` accepts a leading '+', so the digits are checked first.
fn check_digits(field: &'static str, value: &str) -> Result<(), FormatError> {
    if value.is_empty() {
        return Err(FormatError::EmptyField { field });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FormatError::InvalidHex {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_hex_u128(field: &'static str, value: &str) -> Result<u128, FormatError> {
    check_digits(field, value)?;
    u128::from_str_radix(value, 16).map_err(|_| FormatError::InvalidHex {
        field,
        value: value.to_string(),
    })
}

fn parse_hex_u64(field: &'static str, value: &str) -> Result<u64, FormatError> {
    check_digits(field, value)?;
    u64::from_str_radix(value, 16).map_err(|_| FormatError::InvalidHex {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(trace: u128, span: u64) -> TraceContext {
        TraceContext::remote(trace, span)
    }

    #[test]
    fn test_encode_is_unpadded_lowercase() {
        assert_eq!(encode(&ctx(12345, 99998)), "3039-1869e");
        assert_eq!(encode(&ctx(0, 0)), "0-0");
    }

    #[test]
    fn test_encode_ignores_parent() {
        let with_parent = TraceContext::new(
            TraceId::from_u128(1),
            SpanId::from_u64(2),
            Some(SpanId::from_u64(3)),
        );
        assert_eq!(encode(&with_parent), "1-2");
    }

    #[test]
    fn test_round_trip_boundaries() {
        for (trace, span) in [
            (0u128, 0u64),
            (1, 1),
            (u128::MAX, u64::MAX),
            (u128::MAX, 0),
            (0, u64::MAX),
            (12345, 99998),
        ] {
            let original = ctx(trace, span);
            assert_eq!(decode(&encode(&original)).unwrap(), original);
        }
    }

    #[test]
    fn test_round_trip_random() {
        for _ in 0..256 {
            let original = TraceContext::new_root();
            assert_eq!(decode(&encode(&original)).unwrap(), original);
        }
    }

    #[test]
    fn test_decode_accepts_uppercase() {
        let decoded = decode("3039-1869E").unwrap();
        assert_eq!(decoded.trace_id.as_u128(), 12345);
        assert_eq!(decoded.span_id.as_u64(), 99998);
        assert!(decoded.parent_span_id.is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_field_count() {
        assert!(matches!(
            decode("3039"),
            Err(FormatError::InvalidFieldCount { found: 1, .. })
        ));
        assert!(matches!(
            decode("1-2-3"),
            Err(FormatError::InvalidFieldCount { found: 3, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_empty_fields() {
        assert_eq!(decode("-1"), Err(FormatError::EmptyField { field: "trace_id" }));
        assert_eq!(decode("1-"), Err(FormatError::EmptyField { field: "span_id" }));
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        assert!(matches!(decode("xyz-1"), Err(FormatError::InvalidHex { field: "trace_id", .. })));
        assert!(matches!(decode("1-+2"), Err(FormatError::InvalidHex { field: "span_id", .. })));
        assert!(matches!(decode(" 1-2"), Err(FormatError::InvalidHex { .. })));
        assert!(matches!(decode("0x1-2"), Err(FormatError::InvalidHex { .. })));
    }

    #[test]
    fn test_decode_rejects_overflow() {
        // 17 hex digits do not fit a span id.
        assert!(matches!(
            decode("1-10000000000000000"),
            Err(FormatError::InvalidHex { field: "span_id", .. })
        ));
        let too_wide = "1".repeat(33);
        assert!(matches!(
            decode(&format!("{}-1", too_wide)),
            Err(FormatError::InvalidHex { field: "trace_id", .. })
        ));
    }
}
