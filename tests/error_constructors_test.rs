use phoebus::{DecodeError, PhoebusError, TransportError};

#[test]
fn constructors_produce_expected_variants() {
    assert!(matches!(
        PhoebusError::config("bad"),
        PhoebusError::Config { .. }
    ));
    assert!(matches!(
        PhoebusError::connection("refused"),
        PhoebusError::Connection { .. }
    ));
    assert!(matches!(
        PhoebusError::validation("host", "empty"),
        PhoebusError::Validation { .. }
    ));
    assert!(matches!(PhoebusError::io("disk"), PhoebusError::Io { .. }));
    assert!(matches!(
        TransportError::protocol("exception 2"),
        TransportError::Protocol { .. }
    ));
}

#[test]
fn transport_errors_convert_into_top_level() {
    let err: PhoebusError = TransportError::NotConnected.into();
    assert_eq!(
        format!("{}", err),
        "Transport error: not connected to Modbus server"
    );

    let err: PhoebusError = TransportError::ShortRead {
        requested: 38,
        received: 12,
    }
    .into();
    assert_eq!(
        format!("{}", err),
        "Transport error: short read: requested 38 registers, got 12"
    );
}

#[test]
fn decode_errors_convert_into_top_level() {
    let err: PhoebusError = DecodeError::TruncatedInput {
        required: 184,
        received: 100,
    }
    .into();
    assert_eq!(
        format!("{}", err),
        "Decode error: truncated input: need 184 registers, got 100"
    );

    let err: PhoebusError = DecodeError::UnsupportedFamily {
        name: "dual_string".to_string(),
    }
    .into();
    assert!(format!("{}", err).contains("unsupported device family"));
}

#[test]
fn io_errors_convert_from_std() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: PhoebusError = io.into();
    assert!(matches!(err, PhoebusError::Io { .. }));
}
