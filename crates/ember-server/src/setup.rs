//! Translate the persisted configuration into network manager settings.

use std::net::IpAddr;
use std::time::Duration;

use ember_config::{CodecKind, CodecSection, Config, FramingMode, FramingSection};
use ember_net::{
    FramingStrategy, IdentityCodec, Lz4Codec, PacketCodec, ServerConfig, XorCodec,
};

use crate::ServerError;

/// Listener and admission settings from `config`.
pub fn server_config(config: &Config) -> Result<ServerConfig, ServerError> {
    let bind_address: IpAddr = config
        .server
        .bind_address
        .parse()
        .map_err(|_| ServerError::InvalidBindAddress(config.server.bind_address.clone()))?;

    Ok(ServerConfig {
        max_connections: config.server.max_connections,
        quiet_window: Duration::from_millis(config.admission.quiet_window_ms),
        write_timeout: Duration::from_secs(config.server.write_timeout_secs),
        outbound_queue: config.server.outbound_queue,
        ..ServerConfig::new(bind_address, config.server.port)
    })
}

/// Wire framing from `section`.
///
/// Delimited framing is only accepted with the identity codec: the xor and
/// lz4 codecs can emit any byte value, including the delimiter.
pub fn framing(
    section: &FramingSection,
    codec: &CodecSection,
) -> Result<FramingStrategy, ServerError> {
    match section.mode {
        FramingMode::Delimited if codec.kind != CodecKind::Identity => {
            Err(ServerError::IncompatibleFraming { codec: codec.kind })
        }
        FramingMode::Delimited => Ok(FramingStrategy::Delimited {
            delimiter: section.delimiter,
            max_frame_size: section.max_frame_size,
        }),
        FramingMode::LengthPrefixed => Ok(FramingStrategy::LengthPrefixed {
            max_frame_size: section.max_frame_size,
        }),
    }
}

/// Per-session codec factory from `section`.
pub fn codec_factory(
    section: &CodecSection,
) -> impl Fn() -> Box<dyn PacketCodec> + Send + Sync + 'static {
    let kind = section.kind;
    let key = section.key;
    move || -> Box<dyn PacketCodec> {
        match kind {
            CodecKind::Identity => Box::new(IdentityCodec),
            CodecKind::Xor => Box::new(XorCodec::new(key)),
            CodecKind::Lz4 => Box::new(Lz4Codec::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_maps_to_defaults() {
        let server = server_config(&Config::default()).unwrap();
        assert_eq!(server.bind_addr, "0.0.0.0:4005".parse().unwrap());
        assert_eq!(server.max_connections, 1024);
        assert_eq!(server.quiet_window, Duration::from_secs(5));
        assert_eq!(server.write_timeout, Duration::from_secs(10));
        assert_eq!(server.outbound_queue, 1024);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "::".to_string();
        config.server.port = 0;
        let server = server_config(&config).unwrap();
        assert!(server.bind_addr.is_ipv6());
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            server_config(&config),
            Err(ServerError::InvalidBindAddress(ref a)) if a == "not-an-ip"
        ));
    }

    #[test]
    fn test_framing_modes() {
        let delimited = framing(&FramingSection::default(), &CodecSection::default()).unwrap();
        assert!(matches!(
            delimited,
            FramingStrategy::Delimited {
                delimiter: 0xFF,
                max_frame_size: 65536
            }
        ));

        let prefixed = framing(
            &FramingSection {
                mode: FramingMode::LengthPrefixed,
                ..FramingSection::default()
            },
            &CodecSection::default(),
        )
        .unwrap();
        assert_eq!(prefixed.max_frame_size(), 65536);
        assert!(matches!(prefixed, FramingStrategy::LengthPrefixed { .. }));
    }

    #[test]
    fn test_binary_codecs_need_length_prefix() {
        // Both codecs can put the default delimiter on the wire.
        assert_eq!(XorCodec::new(0xBF).encode(b"@").unwrap(), [0xFF]);
        let text = "LOGIN ".repeat(50);
        let compressed = Lz4Codec::default().encode(text.as_bytes()).unwrap();
        assert!(compressed.contains(&0xFF));

        for kind in [CodecKind::Xor, CodecKind::Lz4] {
            let codec = CodecSection { kind, key: 0xBF };
            assert!(matches!(
                framing(&FramingSection::default(), &codec),
                Err(ServerError::IncompatibleFraming { codec: k }) if k == kind
            ));

            let prefixed = FramingSection {
                mode: FramingMode::LengthPrefixed,
                ..FramingSection::default()
            };
            assert!(framing(&prefixed, &codec).is_ok());
        }
    }

    #[test]
    fn test_codec_factory_selects_kind() {
        for (kind, name) in [
            (CodecKind::Identity, IdentityCodec.name()),
            (CodecKind::Xor, XorCodec::new(1).name()),
            (CodecKind::Lz4, Lz4Codec::default().name()),
        ] {
            let factory = codec_factory(&CodecSection { kind, key: 7 });
            assert_eq!(factory().name(), name);
        }
    }

    #[test]
    fn test_xor_factory_uses_configured_key() {
        let factory = codec_factory(&CodecSection {
            kind: CodecKind::Xor,
            key: 0x20,
        });
        let mut codec = factory();
        assert_eq!(codec.encode(b"A").unwrap(), b"a");
    }
}
