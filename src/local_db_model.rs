//! Record definitions for the two collections the core caches.
//!
//! [`Restaurant`] records are read-only from the client's point of view.
//! [`Review`] records are append-only: the client creates them (possibly
//! while offline) and the backend assigns their `id` once a replay
//! succeeds. Both are stored in LMDB as their JSON encoding, keyed by
//! [`Record::store_key`].
//!
//! The backend is not strict about number encoding: ids, foreign keys and
//! ratings show up either as JSON numbers or as numeric strings, and
//! timestamps either as epoch milliseconds or as RFC 3339 strings. Decoding
//! accepts all of these; encoding always writes numbers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One of the two fixed resource domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Restaurants,
    Reviews,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Restaurants, Collection::Reviews];

    /// Name used both as the LMDB database name and as the endpoint path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Restaurants => "restaurants",
            Collection::Reviews => "reviews",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that can live in the durable store.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Backend-assigned identifier, absent for reviews still waiting in the
    /// pending-write queue.
    fn id(&self) -> Option<u64>;

    /// Key under which the record is stored. `None` means the record cannot
    /// be stored (it has neither an id nor a local key).
    fn store_key(&self) -> Option<String> {
        self.id().map(id_key)
    }
}

/// Store key for a backend-assigned id. Zero padding keeps LMDB's
/// lexicographic key order equal to numeric order.
pub fn id_key(id: u64) -> String {
    format!("id:{id:020}")
}

/// Store key for an optimistic record that has no id yet.
pub fn local_key(key: &str) -> String {
    format!("local:{key}")
}

/// Normalizes an id that may arrive as text (for example from a page URL).
///
/// Mirrors integer parsing of the browser client: surrounding whitespace is
/// ignored and the leading run of digits is used, so `"7"`, `" 7 "` and
/// `"7abc"` all yield 7 while `"abc"` yields nothing.
pub fn normalize_id(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A restaurant as served by `GET <base>/restaurants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    pub name: String,

    #[serde(default)]
    pub neighborhood: String,

    /// Photo reference; a few records in the stock dataset have none.
    #[serde(default, deserialize_with = "lenient::opt_text", skip_serializing_if = "Option::is_none")]
    pub photograph: Option<String>,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub latlng: LatLng,

    #[serde(default)]
    pub cuisine_type: String,

    /// Day name to opening hours, e.g. `"Monday" -> "5:30 pm - 11:00 pm"`.
    #[serde(default)]
    pub operating_hours: BTreeMap<String, String>,

    /// Fields the core does not interpret (favourite flags, timestamps).
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Restaurant {
    pub fn page_url(&self) -> String {
        format!("./restaurant.html?id={}", self.id)
    }

    pub fn image_url(&self) -> Option<String> {
        self.photograph
            .as_ref()
            .map(|photo| format!("/img/{photo}.webp"))
    }
}

impl Record for Restaurant {
    const COLLECTION: Collection = Collection::Restaurants;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

/// A review as served by `GET <base>/reviews` or created locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default, deserialize_with = "lenient::opt_u64", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(deserialize_with = "lenient::u64")]
    pub restaurant_id: u64,

    pub name: String,

    #[serde(deserialize_with = "lenient::u8")]
    pub rating: u8,

    #[serde(default)]
    pub comments: String,

    /// Epoch milliseconds, assigned by the client at submission.
    #[serde(
        rename = "createdAt",
        default,
        deserialize_with = "lenient::opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,

    #[serde(
        rename = "updatedAt",
        default,
        deserialize_with = "lenient::opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<i64>,

    /// Local identity of an optimistic review that has no `id` yet.
    /// Never sent to the backend.
    #[serde(rename = "localKey", default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Review {
    pub fn new(restaurant_id: u64, name: impl Into<String>, rating: u8, comments: impl Into<String>) -> Self {
        Self {
            id: None,
            restaurant_id,
            name: name.into(),
            rating,
            comments: comments.into(),
            created_at: None,
            updated_at: None,
            local_key: None,
            extra: Map::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }

    /// The JSON body posted to `POST <base>/reviews`.
    pub fn to_request_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut body = self.clone();
        body.local_key = None;
        serde_json::to_vec(&body)
    }
}

impl Record for Review {
    const COLLECTION: Collection = Collection::Reviews;

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn store_key(&self) -> Option<String> {
        match (self.id, &self.local_key) {
            (Some(id), _) => Some(id_key(id)),
            (None, Some(key)) => Some(local_key(key)),
            (None, None) => None,
        }
    }
}

/// Decoders tolerant of the backend's loose number encoding.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Text(String),
    }

    impl NumberOrText {
        fn into_u64<E: Error>(self) -> Result<u64, E> {
            match self {
                NumberOrText::Unsigned(n) => Ok(n),
                NumberOrText::Signed(n) => u64::try_from(n).map_err(|_| E::custom(format!("negative id {n}"))),
                NumberOrText::Float(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
                NumberOrText::Float(f) => Err(E::custom(format!("expected an integer, got {f}"))),
                NumberOrText::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("expected an integer, got {s:?}"))),
            }
        }

        fn into_millis<E: Error>(self) -> Result<i64, E> {
            match self {
                NumberOrText::Unsigned(n) => i64::try_from(n).map_err(E::custom),
                NumberOrText::Signed(n) => Ok(n),
                NumberOrText::Float(f) => Ok(f as i64),
                NumberOrText::Text(s) => {
                    if let Ok(n) = s.trim().parse::<i64>() {
                        return Ok(n);
                    }
                    chrono::DateTime::parse_from_rfc3339(s.trim())
                        .map(|dt| dt.timestamp_millis())
                        .map_err(|e| E::custom(format!("bad timestamp {s:?}: {e}")))
                }
            }
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        NumberOrText::deserialize(d)?.into_u64()
    }

    pub fn u8<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        let n = NumberOrText::deserialize(d)?.into_u64()?;
        u8::try_from(n).map_err(|_| D::Error::custom(format!("rating {n} out of range")))
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<NumberOrText>::deserialize(d)?
            .map(NumberOrText::into_u64)
            .transpose()
    }

    pub fn opt_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Option::<NumberOrText>::deserialize(d)?
            .map(NumberOrText::into_millis)
            .transpose()
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<NumberOrText>::deserialize(d)?.map(|v| match v {
            NumberOrText::Unsigned(n) => n.to_string(),
            NumberOrText::Signed(n) => n.to_string(),
            NumberOrText::Float(f) => f.to_string(),
            NumberOrText::Text(s) => s,
        }))
    }
}
