//! Query-parameter protocol of the broker's upgrade endpoints.
//!
//! A WebSocket connection to the broker says what it is for in its URL query:
//!
//! ```text
//! pairing endpoint (default /pair)
//!   ?pt=dev&uuid=<device id>              device registers its command channel
//!   ?pt=req&uuid=<device id>&port=<port>  client asks for a tunnel to that device
//!   ?pt=resp&uuid=<token>                 device opens the response leg of a pair
//!
//! direct-tunnel endpoint (default /xport)
//!   ?port=<port>[&target=<host>]          broker dials <host>:<port> itself
//! ```

use url::{form_urlencoded, Url};

use super::command::ProtocolError;

/// Host the broker dials for a direct tunnel when no `target` is given.
pub const DEFAULT_TUNNEL_TARGET: &str = "127.0.0.1";

/// A parsed pairing-endpoint query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairQuery {
    /// `pt=dev`: a device registering its command channel.
    Device { uuid: String },
    /// `pt=req`: a client requesting a tunnel to device `uuid`, local port `port`.
    Request { uuid: String, port: u16 },
    /// `pt=resp`: the response leg of the pair identified by `token`.
    Response { token: String },
}

impl PairQuery {
    /// Parses the query component of a pairing-endpoint URL (without the `?`).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingParameter`] when `pt`, `uuid` or `port`
    /// is absent, [`ProtocolError::InvalidParameter`] when `port` is not a
    /// valid `u16`, and [`ProtocolError::UnsupportedPairType`] for an unknown `pt`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lxport_core::PairQuery;
    ///
    /// let q = PairQuery::parse("pt=req&uuid=D1&port=3389").unwrap();
    /// assert_eq!(q, PairQuery::Request { uuid: "D1".to_string(), port: 3389 });
    /// ```
    pub fn parse(query: &str) -> Result<Self, ProtocolError> {
        let params = Params::parse(query);
        let pair_type = params.required("pt")?;
        let uuid = params.required("uuid")?;

        match pair_type.as_str() {
            "dev" => Ok(PairQuery::Device { uuid }),
            "req" => Ok(PairQuery::Request {
                uuid,
                port: params.port()?,
            }),
            "resp" => Ok(PairQuery::Response { token: uuid }),
            _ => Err(ProtocolError::UnsupportedPairType(pair_type)),
        }
    }

    /// Renders this query back into `key=value&...` form.
    pub fn to_query_string(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        match self {
            PairQuery::Device { uuid } => {
                ser.append_pair("pt", "dev").append_pair("uuid", uuid);
            }
            PairQuery::Request { uuid, port } => {
                ser.append_pair("pt", "req")
                    .append_pair("uuid", uuid)
                    .append_pair("port", &port.to_string());
            }
            PairQuery::Response { token } => {
                ser.append_pair("pt", "resp").append_pair("uuid", token);
            }
        }
        ser.finish()
    }
}

/// A parsed direct-tunnel-endpoint query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelQuery {
    pub port: u16,
    /// Host to dial; `None` means [`DEFAULT_TUNNEL_TARGET`].
    pub target: Option<String>,
}

impl TunnelQuery {
    /// Parses the query component of a direct-tunnel URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `port` is missing or not a valid `u16`.
    pub fn parse(query: &str) -> Result<Self, ProtocolError> {
        let params = Params::parse(query);
        Ok(TunnelQuery {
            port: params.port()?,
            target: params.optional("target"),
        })
    }

    /// The host the broker should dial.
    pub fn target_host(&self) -> &str {
        self.target.as_deref().unwrap_or(DEFAULT_TUNNEL_TARGET)
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_host(), self.port)
    }

    pub fn to_query_string(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        ser.append_pair("port", &self.port.to_string());
        if let Some(target) = &self.target {
            ser.append_pair("target", target);
        }
        ser.finish()
    }
}

/// Joins a broker base URL (`ws://host:port/path`) with an endpoint query.
///
/// Any query already present on `base` is replaced.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidParameter`] if `base` is not an absolute URL.
///
/// # Examples
///
/// ```rust
/// use lxport_core::protocol::query::endpoint_url;
///
/// let url = endpoint_url("ws://relay.example:8010/pair", "pt=dev&uuid=D1").unwrap();
/// assert_eq!(url, "ws://relay.example:8010/pair?pt=dev&uuid=D1");
/// ```
pub fn endpoint_url(base: &str, query: &str) -> Result<String, ProtocolError> {
    let mut url = Url::parse(base).map_err(|_| ProtocolError::InvalidParameter {
        name: "url",
        value: base.to_string(),
    })?;
    url.set_query(Some(query));
    Ok(url.into())
}

/// Decoded `key=value` pairs; the first occurrence of a key wins.
struct Params(Vec<(String, String)>);

impl Params {
    fn parse(query: &str) -> Self {
        Params(form_urlencoded::parse(query.as_bytes()).into_owned().collect())
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ProtocolError> {
        self.optional(name)
            .ok_or(ProtocolError::MissingParameter(name))
    }

    fn port(&self) -> Result<u16, ProtocolError> {
        let raw = self.required("port")?;
        raw.parse::<u16>()
            .map_err(|_| ProtocolError::InvalidParameter {
                name: "port",
                value: raw,
            })
    }
}
