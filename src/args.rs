use clap::Parser;
use http::StatusCode;
use std::ffi::OsString;
use std::path::PathBuf;

/// Serve a directory, a file or a literal string over HTTP (and HTTPS when
/// a certificate is available).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listen on this address
    #[arg(long, default_value = "0.0.0.0")]
    pub address: String,

    /// Plain HTTP port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Allowed CORS origin; `*` allows every origin
    #[arg(long, default_value = "*")]
    pub origin: String,

    /// HTTPS port, used when both the certificate and the key exist
    #[arg(long = "sslPort", alias = "ssl-port", default_value_t = 10433)]
    pub ssl_port: u16,

    /// URL path prefix to serve under
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Comma separated glob patterns; matching path segments are refused
    #[arg(long, default_value = "")]
    pub deny: String,

    /// Status code for file and literal responses (200-999)
    #[arg(long, default_value = "200", value_parser = parse_status)]
    pub status: StatusCode,

    /// TLS certificate chain (PEM)
    #[arg(long, default_value = "cert.pem")]
    pub cert: PathBuf,

    /// TLS private key (PEM)
    #[arg(long, default_value = "key.pem")]
    pub key: PathBuf,

    /// Directory or file to serve; anything else is served as literal text
    #[arg(default_value = ".")]
    pub target: OsString,
}

fn parse_status(value: &str) -> Result<StatusCode, String> {
    let code: u16 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    // An informational status cannot carry the body it would be sent with.
    if !(200..=999).contains(&code) {
        return Err(format!("`{code}` is not a valid status (200-999)"));
    }
    StatusCode::from_u16(code).map_err(|_| format!("`{code}` is not a valid status (200-999)"))
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["spark"]);

        assert_eq!(args.address, "0.0.0.0");
        assert_eq!(args.port, 8080);
        assert_eq!(args.origin, "*");
        assert_eq!(args.ssl_port, 10433);
        assert_eq!(args.path, "/");
        assert_eq!(args.deny, "");
        assert_eq!(args.status, StatusCode::OK);
        assert_eq!(args.cert, PathBuf::from("cert.pem"));
        assert_eq!(args.key, PathBuf::from("key.pem"));
        assert_eq!(args.target, ".");
    }

    #[rstest]
    #[case("--sslPort")]
    #[case("--ssl-port")]
    fn the_tls_port_has_two_spellings(#[case] flag: &str) {
        let args = Args::parse_from(["spark", flag, "8443"]);
        assert_eq!(args.ssl_port, 8443);
    }

    #[test]
    fn everything_can_be_overridden() {
        let args = Args::parse_from([
            "spark",
            "--address",
            "127.0.0.1",
            "--port",
            "9000",
            "--path",
            "/app/",
            "--deny",
            "*.key, .git",
            "--status",
            "418",
            "--origin",
            "https://*.example.com",
            "hello world",
        ]);

        assert_eq!(args.address, "127.0.0.1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.path, "/app/");
        assert_eq!(args.deny, "*.key, .git");
        assert_eq!(args.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(args.origin, "https://*.example.com");
        assert_eq!(args.target, "hello world");
    }

    #[rstest]
    #[case("99")]
    #[case("100")]
    #[case("199")]
    #[case("1000")]
    #[case("ok")]
    fn invalid_statuses_are_rejected(#[case] status: &str) {
        assert!(Args::try_parse_from(["spark", "--status", status]).is_err());
    }

    #[rstest]
    #[case("200", 200)]
    #[case("299", 299)]
    #[case("999", 999)]
    fn statuses_from_200_to_999_are_accepted(#[case] raw: &str, #[case] code: u16) {
        let args = Args::parse_from(["spark", "--status", raw]);
        assert_eq!(args.status.as_u16(), code);
    }

    #[cfg(unix)]
    #[test]
    fn the_target_may_be_any_bytes() {
        use std::os::unix::ffi::OsStringExt;

        let target = OsString::from_vec(b"caf\xe9".to_vec());
        let args = Args::parse_from([OsString::from("spark"), target.clone()]);
        assert_eq!(args.target, target);
    }
}
