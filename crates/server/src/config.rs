use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use folio_auth::AdminCredential;
use folio_store::normalize_upload_dir;

use crate::mail::{MailConfig, MailTransport, SmtpSettings};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub data_file: PathBuf,
    pub upload_dir: String,
    pub store_io_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub admin_username: String,
    /// `pbkdf2-sha256$<iterations>$<salt hex>$<digest hex>`
    pub admin_password_hash: String,
    pub session_ttl_secs: u64,
    pub session_max_active: usize,
    pub cookie_secure: bool,
    pub metrics_require_auth: bool,
    pub contact_rate_limit_per_window: u32,
    pub contact_rate_limit_window_secs: u64,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    /// Environment variables win over entries from `FOLIO_CONFIG_PATH`.
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("FOLIO_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                merged.extend(parse_env_file(config_path)?);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_value(
            kv,
            "FOLIO_BIND_ADDR",
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "a valid host:port socket address",
        )?;

        let cookie_secure = parse_flag(kv, "FOLIO_COOKIE_SECURE", false)?;
        let dev_allow_nonlocal_bind = parse_flag(kv, "FOLIO_DEV_ALLOW_NONLOCAL_BIND", false)?;

        if !bind_addr.ip().is_loopback() && !cookie_secure {
            if dev_allow_nonlocal_bind && bind_addr.ip().is_unspecified() {
                // Containers publish 0.0.0.0 behind a local port mapping.
            } else {
                return Err(StartupError {
                    code: "ERR_NONLOCAL_BIND_REQUIRES_SECURE_COOKIE",
                    message: "non-local bind requires FOLIO_COOKIE_SECURE=true; refuse startup"
                        .to_string(),
                });
            }
        }

        let static_dir = PathBuf::from(optional_string(kv, "FOLIO_STATIC_DIR").unwrap_or("static"));
        let data_file = optional_string(kv, "FOLIO_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| static_dir.join("cms_data.json"));

        let upload_dir =
            normalize_upload_dir(optional_string(kv, "FOLIO_UPLOAD_DIR").unwrap_or("uploads"))
                .ok_or_else(|| StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: "FOLIO_UPLOAD_DIR must be a relative path inside the static dir \
                              without . or .. segments"
                        .to_string(),
                })?;

        let store_io_timeout_ms = parse_value(kv, "FOLIO_STORE_IO_TIMEOUT_MS", 2000, "an integer")?;
        let max_upload_bytes =
            parse_value(kv, "FOLIO_MAX_UPLOAD_BYTES", 10 * 1024 * 1024, "an integer")?;

        let admin_username = require_nonempty(kv, "FOLIO_ADMIN_USERNAME")?;
        let admin_password_hash = require_nonempty(kv, "FOLIO_ADMIN_PASSWORD_HASH")?;
        AdminCredential::new(&admin_username, &admin_password_hash).map_err(|err| {
            StartupError {
                code: "ERR_INVALID_ADMIN_PASSWORD_HASH",
                message: format!("FOLIO_ADMIN_PASSWORD_HASH: {}", err.message),
            }
        })?;

        let session_ttl_secs =
            parse_value(kv, "FOLIO_SESSION_TTL_SECS", 8 * 60 * 60, "an integer")?;
        if session_ttl_secs == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "FOLIO_SESSION_TTL_SECS must be >= 1".to_string(),
            });
        }
        let session_max_active = parse_value(kv, "FOLIO_SESSION_MAX_ACTIVE", 16, "an integer")?;

        let metrics_require_auth = parse_flag(kv, "FOLIO_METRICS_REQUIRE_AUTH", true)?;

        let contact_rate_limit_per_window =
            parse_value(kv, "FOLIO_CONTACT_RATE_LIMIT_PER_WINDOW", 5, "an integer")?;
        let contact_rate_limit_window_secs =
            parse_value(kv, "FOLIO_CONTACT_RATE_LIMIT_WINDOW_SECS", 600, "an integer")?;

        let mail = parse_mail_config(kv)?;

        Ok(Self {
            bind_addr,
            static_dir,
            data_file,
            upload_dir,
            store_io_timeout_ms,
            max_upload_bytes,
            admin_username,
            admin_password_hash,
            session_ttl_secs,
            session_max_active,
            cookie_secure,
            metrics_require_auth,
            contact_rate_limit_per_window,
            contact_rate_limit_window_secs,
            mail,
        })
    }
}

fn parse_mail_config(kv: &HashMap<String, String>) -> Result<MailConfig, StartupError> {
    let relay_url = optional_string(kv, "FOLIO_MAIL_RELAY_URL");
    let transport = match optional_string(kv, "FOLIO_MAIL_TRANSPORT") {
        Some("http") => MailTransport::Http {
            url: require_nonempty(kv, "FOLIO_MAIL_RELAY_URL")?,
            token: None,
        },
        Some("smtp") => MailTransport::Smtp(parse_smtp_settings(kv)?),
        Some("none") => MailTransport::Disabled,
        None => match relay_url {
            Some(url) => MailTransport::Http {
                url: url.to_string(),
                token: None,
            },
            None => MailTransport::Disabled,
        },
        Some(_) => {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "FOLIO_MAIL_TRANSPORT must be http, smtp or none".to_string(),
            });
        }
    };

    let transport = match transport {
        MailTransport::Http { url, .. } => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: "FOLIO_MAIL_RELAY_URL must be an http(s) URL".to_string(),
                });
            }
            MailTransport::Http {
                url,
                token: optional_string(kv, "FOLIO_MAIL_RELAY_TOKEN").map(|s| s.to_string()),
            }
        }
        other => other,
    };

    let from_address = optional_string(kv, "FOLIO_MAIL_FROM")
        .unwrap_or("portfolio@localhost")
        .to_string();
    let timeout_ms = parse_value(kv, "FOLIO_MAIL_TIMEOUT_MS", 5000, "an integer")?;

    Ok(MailConfig {
        transport,
        from_address,
        timeout_ms,
    })
}

fn parse_smtp_settings(kv: &HashMap<String, String>) -> Result<SmtpSettings, StartupError> {
    let host = require_nonempty(kv, "FOLIO_SMTP_HOST")?;
    let port = parse_value(kv, "FOLIO_SMTP_PORT", 587u16, "a port number")?;
    let starttls = parse_flag(kv, "FOLIO_SMTP_STARTTLS", true)?;
    let username = optional_string(kv, "FOLIO_SMTP_USERNAME").map(|s| s.to_string());
    let password = optional_string(kv, "FOLIO_SMTP_PASSWORD").map(|s| s.to_string());

    if username.is_some() != password.is_some() {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "FOLIO_SMTP_USERNAME and FOLIO_SMTP_PASSWORD must be set together"
                .to_string(),
        });
    }
    if password.is_some() && !starttls {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SMTP credentials require FOLIO_SMTP_STARTTLS=true".to_string(),
        });
    }

    Ok(SmtpSettings {
        host,
        port,
        starttls,
        username,
        password,
    })
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
            });
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(kv)
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

fn optional_string<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_string(kv, key)
        .map(|s| s.to_string())
        .ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
}

/// Blank or absent values fall back to `default`.
fn parse_value<T: FromStr>(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: T,
    expected: &str,
) -> Result<T, StartupError> {
    match optional_string(kv, key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be {}", key, expected),
        }),
    }
}

fn parse_flag(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: bool,
) -> Result<bool, StartupError> {
    match optional_string(kv, key) {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes" | "YES") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "NO") => Ok(false),
        Some(_) => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be true or false", key),
        }),
    }
}
