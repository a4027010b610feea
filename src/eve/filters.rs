use crate::eve::EveEvent;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;

/// An in-place event annotator.
///
/// Filters run in the fixed order given at pipeline construction and are
/// best-effort: enrichment failures are swallowed here and never reach the
/// ingestion loop, since a missing annotation must not block the record.
pub trait EveFilter: Send + Sync {
    fn filter(&self, event: &mut EveEvent);
}

/// Ensures alert events carry a `tags` array.
///
/// Archive and escalate operations append to this array later, so it has to
/// exist by the time the event lands in the store.
pub struct TagsFilter;

impl EveFilter for TagsFilter {
    fn filter(&self, event: &mut EveEvent) {
        if event.event_type() != Some("alert") {
            return;
        }
        let has_tags = matches!(event.get("tags"), Some(Value::Array(_)));
        if !has_tags {
            event.set("tags", json!([]));
        }
    }
}

/// Result of a GeoIP lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoIp {
    pub country_code: String,
    pub country_name: Option<String>,
    pub city: Option<String>,
}

/// Pure lookup consumed by the GeoIP filter. A miss returns None and leaves
/// the event untouched; lookups never error.
pub trait GeoIpResolver: Send + Sync {
    fn lookup(&self, addr: IpAddr) -> Option<GeoIp>;
}

/// Resolver used when no GeoIP database is available.
pub struct NullGeoIpResolver;

impl GeoIpResolver for NullGeoIpResolver {
    fn lookup(&self, _addr: IpAddr) -> Option<GeoIp> {
        None
    }
}

/// Annotates `src_ip` and `dest_ip` with geo fields.
pub struct GeoIpFilter {
    resolver: Arc<dyn GeoIpResolver>,
}

impl GeoIpFilter {
    pub fn new(resolver: Arc<dyn GeoIpResolver>) -> Self {
        Self { resolver }
    }

    fn annotate(&self, event: &mut EveEvent, ip_field: &str, geo_field: &str) {
        let Some(addr) = event
            .get(ip_field)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<IpAddr>().ok())
        else {
            return;
        };
        if let Some(geo) = self.resolver.lookup(addr) {
            let mut obj = serde_json::Map::new();
            obj.insert("country_code".to_string(), json!(geo.country_code));
            if let Some(name) = geo.country_name {
                obj.insert("country_name".to_string(), json!(name));
            }
            if let Some(city) = geo.city {
                obj.insert("city".to_string(), json!(city));
            }
            event.set(geo_field, Value::Object(obj));
        }
    }
}

impl EveFilter for GeoIpFilter {
    fn filter(&self, event: &mut EveEvent) {
        self.annotate(event, "src_ip", "geoip_src");
        self.annotate(event, "dest_ip", "geoip_dest");
    }
}

/// Splits `http.http_user_agent` into product and version fields.
///
/// A deliberately shallow parse; anything unrecognized is left as-is.
pub struct UserAgentFilter;

impl UserAgentFilter {
    fn parse(user_agent: &str) -> Option<(String, String)> {
        // Take the first product/version token, e.g. "curl/8.4.0".
        let token = user_agent.split_whitespace().next()?;
        let (product, version) = token.split_once('/')?;
        if product.is_empty() || version.is_empty() {
            return None;
        }
        Some((product.to_string(), version.to_string()))
    }
}

impl EveFilter for UserAgentFilter {
    fn filter(&self, event: &mut EveEvent) {
        let Some(user_agent) = event
            .get("http")
            .and_then(|http| http.get("http_user_agent"))
            .and_then(Value::as_str)
        else {
            return;
        };
        if let Some((product, version)) = Self::parse(user_agent) {
            event.set(
                "user_agent",
                json!({
                    "product": product,
                    "version": version,
                }),
            );
        }
    }
}
