//! Storage account connection strings.
//!
//! A connection string is a `;`-separated list of `key=value` settings, for
//! example:
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey=<base64>;EndpointSuffix=core.windows.net
//! ```
//!
//! Three shapes are accepted:
//! - **Development storage**: `UseDevelopmentStorage=true`, optionally with
//!   `DevelopmentStorageProxyUri`
//! - **Shared Key**: `AccountName` and `AccountKey`
//! - **Shared Access Signature**: `SharedAccessSignature` together with
//!   `QueueEndpoint` or `AccountName`

use crate::error::ConfigurationError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::Url;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "connection_string_tests.rs"]
mod tests;

/// Environment variable the quickstart reads the connection string from
pub const CONNECTION_STRING_ENV_VAR: &str = "storageconnectionstring";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_QUEUE_PORT: u16 = 10001;
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

// Lowercased; matching is case-insensitive
const KEY_PROTOCOL: &str = "defaultendpointsprotocol";
const KEY_ACCOUNT_NAME: &str = "accountname";
const KEY_ACCOUNT_KEY: &str = "accountkey";
const KEY_ENDPOINT_SUFFIX: &str = "endpointsuffix";
const KEY_QUEUE_ENDPOINT: &str = "queueendpoint";
const KEY_SAS: &str = "sharedaccesssignature";
const KEY_USE_DEV_STORAGE: &str = "usedevelopmentstorage";
const KEY_DEV_PROXY: &str = "developmentstorageproxyuri";

/// Settings that belong to other storage services and are accepted but unused
const IGNORED_KEYS: &[&str] = &[
    "blobendpoint",
    "tableendpoint",
    "fileendpoint",
    "queuesecondaryendpoint",
    "blobsecondaryendpoint",
    "tablesecondaryendpoint",
    "filesecondaryendpoint",
];

/// How requests to the queue endpoint are authorized
#[derive(Clone)]
pub enum StorageCredentials {
    /// HMAC-SHA256 signing with the decoded account key
    SharedKey {
        account_name: String,
        account_key: Zeroizing<Vec<u8>>,
    },
    /// Pre-signed SAS token appended to every request query
    SharedAccessSignature { token: String },
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey { account_name, .. } => f
                .debug_struct("SharedKey")
                .field("account_name", account_name)
                .field("account_key", &"<redacted>")
                .finish(),
            Self::SharedAccessSignature { .. } => f
                .debug_struct("SharedAccessSignature")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Parsed and validated storage connection string
#[derive(Debug, Clone)]
pub struct StorageConnectionString {
    account_name: Option<String>,
    queue_endpoint: Url,
    credentials: StorageCredentials,
    development_storage: bool,
}

impl StorageConnectionString {
    /// Parse a connection string
    ///
    /// `None`, blank and malformed values all fail, so callers can treat the
    /// error as "no usable configuration" before any remote call is made.
    pub fn parse(value: Option<&str>) -> Result<Self, ConfigurationError> {
        let raw = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: CONNECTION_STRING_ENV_VAR.to_string(),
            })?;

        let settings = Self::split_settings(raw)?;

        if settings.contains_key(KEY_USE_DEV_STORAGE) {
            return Self::development_storage(&settings);
        }

        if settings.contains_key(KEY_DEV_PROXY) {
            return Err(ConfigurationError::Invalid {
                message: "DevelopmentStorageProxyUri requires UseDevelopmentStorage=true"
                    .to_string(),
            });
        }

        match (settings.get(KEY_ACCOUNT_KEY), settings.get(KEY_SAS)) {
            (Some(_), Some(_)) => Err(ConfigurationError::Invalid {
                message: "AccountKey and SharedAccessSignature are mutually exclusive".to_string(),
            }),
            (Some(key), None) => Self::shared_key(&settings, key),
            (None, Some(token)) => Self::shared_access_signature(&settings, token),
            (None, None) => Err(ConfigurationError::Missing {
                key: "AccountKey or SharedAccessSignature".to_string(),
            }),
        }
    }

    /// Account name, when the connection string names one
    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    /// Base URL of the queue service
    pub fn queue_endpoint(&self) -> &Url {
        &self.queue_endpoint
    }

    /// Credentials used to authorize requests
    pub fn credentials(&self) -> &StorageCredentials {
        &self.credentials
    }

    /// Whether this points at the local storage emulator
    pub fn is_development_storage(&self) -> bool {
        self.development_storage
    }

    fn split_settings(raw: &str) -> Result<HashMap<String, String>, ConfigurationError> {
        let mut settings = HashMap::new();

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) =
                segment
                    .split_once('=')
                    .ok_or_else(|| ConfigurationError::Parsing {
                        message: "every setting must have the form key=value".to_string(),
                    })?;

            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if key.is_empty() || value.is_empty() {
                return Err(ConfigurationError::Parsing {
                    message: "setting keys and values cannot be empty".to_string(),
                });
            }

            let known = [
                KEY_PROTOCOL,
                KEY_ACCOUNT_NAME,
                KEY_ACCOUNT_KEY,
                KEY_ENDPOINT_SUFFIX,
                KEY_QUEUE_ENDPOINT,
                KEY_SAS,
                KEY_USE_DEV_STORAGE,
                KEY_DEV_PROXY,
            ];
            if !known.contains(&key.as_str()) && !IGNORED_KEYS.contains(&key.as_str()) {
                return Err(ConfigurationError::Invalid {
                    message: format!("unrecognized setting '{}'", key),
                });
            }

            if settings.insert(key.clone(), value.to_string()).is_some() {
                return Err(ConfigurationError::Invalid {
                    message: format!("setting '{}' appears more than once", key),
                });
            }
        }

        if settings.is_empty() {
            return Err(ConfigurationError::Parsing {
                message: "connection string contains no settings".to_string(),
            });
        }

        Ok(settings)
    }

    fn development_storage(settings: &HashMap<String, String>) -> Result<Self, ConfigurationError> {
        let enabled = settings
            .get(KEY_USE_DEV_STORAGE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !enabled {
            return Err(ConfigurationError::Invalid {
                message: "UseDevelopmentStorage only accepts 'true'".to_string(),
            });
        }

        if settings
            .keys()
            .any(|k| k != KEY_USE_DEV_STORAGE && k != KEY_DEV_PROXY)
        {
            return Err(ConfigurationError::Invalid {
                message: "UseDevelopmentStorage cannot be combined with account settings"
                    .to_string(),
            });
        }

        let (scheme, host) = match settings.get(KEY_DEV_PROXY) {
            Some(proxy) => {
                let proxy = parse_url(KEY_DEV_PROXY, proxy)?;
                let host = proxy
                    .host_str()
                    .ok_or_else(|| ConfigurationError::Invalid {
                        message: "DevelopmentStorageProxyUri has no host".to_string(),
                    })?
                    .to_string();
                (proxy.scheme().to_string(), host)
            }
            None => ("http".to_string(), "127.0.0.1".to_string()),
        };

        let endpoint = parse_url(
            KEY_QUEUE_ENDPOINT,
            &format!(
                "{}://{}:{}/{}",
                scheme, host, DEV_QUEUE_PORT, DEV_ACCOUNT_NAME
            ),
        )?;

        Ok(Self {
            account_name: Some(DEV_ACCOUNT_NAME.to_string()),
            queue_endpoint: endpoint,
            credentials: StorageCredentials::SharedKey {
                account_name: DEV_ACCOUNT_NAME.to_string(),
                account_key: decode_account_key(DEV_ACCOUNT_KEY)?,
            },
            development_storage: true,
        })
    }

    fn shared_key(
        settings: &HashMap<String, String>,
        account_key: &str,
    ) -> Result<Self, ConfigurationError> {
        let account_name =
            settings
                .get(KEY_ACCOUNT_NAME)
                .ok_or_else(|| ConfigurationError::Missing {
                    key: "AccountName".to_string(),
                })?;

        let endpoint = Self::resolve_endpoint(settings, account_name)?;

        Ok(Self {
            account_name: Some(account_name.clone()),
            queue_endpoint: endpoint,
            credentials: StorageCredentials::SharedKey {
                account_name: account_name.clone(),
                account_key: decode_account_key(account_key)?,
            },
            development_storage: false,
        })
    }

    fn shared_access_signature(
        settings: &HashMap<String, String>,
        token: &str,
    ) -> Result<Self, ConfigurationError> {
        let account_name = settings.get(KEY_ACCOUNT_NAME).cloned();

        let endpoint = match (&account_name, settings.get(KEY_QUEUE_ENDPOINT)) {
            (_, Some(endpoint)) => parse_url(KEY_QUEUE_ENDPOINT, endpoint)?,
            (Some(name), None) => Self::resolve_endpoint(settings, name)?,
            (None, None) => {
                return Err(ConfigurationError::Missing {
                    key: "QueueEndpoint or AccountName".to_string(),
                })
            }
        };

        let token = token.trim_start_matches('?').to_string();
        if token.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "SharedAccessSignature is empty".to_string(),
            });
        }

        Ok(Self {
            account_name,
            queue_endpoint: endpoint,
            credentials: StorageCredentials::SharedAccessSignature { token },
            development_storage: false,
        })
    }

    /// Explicit `QueueEndpoint`, or the endpoint derived from protocol,
    /// account and suffix
    fn resolve_endpoint(
        settings: &HashMap<String, String>,
        account_name: &str,
    ) -> Result<Url, ConfigurationError> {
        if let Some(endpoint) = settings.get(KEY_QUEUE_ENDPOINT) {
            return parse_url(KEY_QUEUE_ENDPOINT, endpoint);
        }

        let protocol = settings
            .get(KEY_PROTOCOL)
            .map(|p| p.to_ascii_lowercase())
            .unwrap_or_else(|| "https".to_string());
        if protocol != "https" && protocol != "http" {
            return Err(ConfigurationError::Invalid {
                message: format!("unsupported DefaultEndpointsProtocol '{}'", protocol),
            });
        }

        let suffix = settings
            .get(KEY_ENDPOINT_SUFFIX)
            .map(String::as_str)
            .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);

        parse_url(
            KEY_QUEUE_ENDPOINT,
            &format!("{}://{}.queue.{}", protocol, account_name, suffix),
        )
    }
}

impl FromStr for StorageConnectionString {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(Some(s))
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigurationError> {
    let url = Url::parse(value).map_err(|e| ConfigurationError::Invalid {
        message: format!("{} is not a valid URL: {}", key, e),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigurationError::Invalid {
            message: format!("{} must use http or https", key),
        });
    }

    Ok(url)
}

fn decode_account_key(value: &str) -> Result<Zeroizing<Vec<u8>>, ConfigurationError> {
    STANDARD
        .decode(value)
        .map(Zeroizing::new)
        .map_err(|_| ConfigurationError::Invalid {
            message: "AccountKey is not valid base64".to_string(),
        })
}
