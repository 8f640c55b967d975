//! Pairing token exchange
//!
//! A pairing token is the shareable URL `<base-url>#/mobile-sender?id=<peer>`.
//! The `id` parameter name is fixed; already printed QR codes depend on it.

use camlink_core::{CamLinkError, PeerIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::{form_urlencoded, Url};

/// Route fragment the sender page is served under
pub const PAIRING_ROUTE: &str = "#/mobile-sender";

/// Query parameter carrying the peer identifier
pub const PAIRING_PARAM: &str = "id";

/// Prefix of in-memory object URLs that are meaningless outside their origin
const OBJECT_URL_PREFIX: &str = "blob:";

/// Pairing input could not be turned into a dial target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// Nothing to parse
    #[error("pairing input is empty")]
    Empty,

    /// No `id` parameter present
    #[error("missing '{param}' parameter in '{input}'")]
    MissingId {
        /// Raw input
        input: String,
        /// Parameter that was looked for
        param: &'static str,
    },

    /// `id` parameter present but blank
    #[error("empty '{param}' parameter in '{input}'")]
    EmptyId {
        /// Raw input
        input: String,
        /// Parameter that was looked for
        param: &'static str,
    },
}

impl From<PairingError> for CamLinkError {
    fn from(err: PairingError) -> Self {
        let input = match &err {
            PairingError::Empty => String::new(),
            PairingError::MissingId { input, .. } | PairingError::EmptyId { input, .. } => {
                input.clone()
            }
        };
        CamLinkError::PairingParse {
            input,
            reason: err.to_string(),
        }
    }
}

/// Strip object-URL prefixes and any fragment or query from `base`
pub fn normalize_base_url(base: &str) -> String {
    let trimmed = base.trim();
    let without_prefix = trimmed.strip_prefix(OBJECT_URL_PREFIX).unwrap_or(trimmed);
    let end = without_prefix
        .find(|c: char| c == '#' || c == '?')
        .unwrap_or(without_prefix.len());
    without_prefix[..end].to_string()
}

/// Shareable encoding of a base address plus a target peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingToken {
    base_url: String,
    identity: PeerIdentity,
    url: String,
}

impl PairingToken {
    /// Compose a token for `identity` under `base_url`
    pub fn encode(base_url: &str, identity: &PeerIdentity) -> Self {
        let base_url = normalize_base_url(base_url);
        let encoded: String = form_urlencoded::byte_serialize(identity.as_str().as_bytes()).collect();
        let url = format!(
            "{}{}?{}={}",
            base_url, PAIRING_ROUTE, PAIRING_PARAM, encoded
        );
        Self {
            base_url,
            identity: identity.clone(),
            url,
        }
    }

    /// Extract the target identity from raw pairing input
    pub fn decode(raw: &str) -> Result<PeerIdentity, PairingError> {
        decode(raw)
    }

    /// Normalized base address
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Target identity
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Full shareable URL
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Extract the target identity from a pairing URL.
///
/// Accepts absolute URLs, relative ones, and bare `#/route?id=..` fragments.
/// The id is looked up in the fragment's query first, then in the URL query.
pub fn decode(raw: &str) -> Result<PeerIdentity, PairingError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(PairingError::Empty);
    }

    let found = match Url::parse(input) {
        Ok(url) => url
            .fragment()
            .and_then(|fragment| fragment.split_once('?'))
            .and_then(|(_, query)| find_param(query))
            .or_else(|| {
                url.query_pairs()
                    .find(|(key, _)| key == PAIRING_PARAM)
                    .map(|(_, value)| value.into_owned())
            }),
        // Not absolute; scan the raw text
        Err(_) => {
            let (before_fragment, fragment) = match input.split_once('#') {
                Some((before, fragment)) => (before, Some(fragment)),
                None => (input, None),
            };
            fragment
                .and_then(|f| f.split_once('?'))
                .and_then(|(_, query)| find_param(query))
                .or_else(|| {
                    before_fragment
                        .split_once('?')
                        .and_then(|(_, query)| find_param(query))
                })
        }
    };

    match found {
        None => Err(PairingError::MissingId {
            input: input.to_string(),
            param: PAIRING_PARAM,
        }),
        Some(value) if value.trim().is_empty() => Err(PairingError::EmptyId {
            input: input.to_string(),
            param: PAIRING_PARAM,
        }),
        Some(value) => Ok(PeerIdentity::new(value)),
    }
}

fn find_param(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == PAIRING_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// How the sender's pairing token is offered to the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairingAffordance {
    /// Payload for the external QR renderer
    QrCode {
        /// Encoded pairing URL
        payload: String,
    },
    /// Same-origin link that opens the sender page backed by simulated devices
    SimulatorLink {
        /// Link target
        url: String,
    },
}

impl PairingAffordance {
    /// Pick the affordance for the host environment
    pub fn for_environment(token: &PairingToken, restricted_network: bool) -> Self {
        if restricted_network {
            PairingAffordance::SimulatorLink {
                url: format!("{}&mode=simulator", token.as_str()),
            }
        } else {
            PairingAffordance::QrCode {
                payload: token.as_str().to_string(),
            }
        }
    }

    /// The URL carried by either variant
    pub fn url(&self) -> &str {
        match self {
            PairingAffordance::QrCode { payload } => payload,
            PairingAffordance::SimulatorLink { url } => url,
        }
    }
}
