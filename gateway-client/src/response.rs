//! Schema-tolerant response normalizer
//!
//! The gateway's response schema drifts; the client never binds it to a
//! rigid struct. Any well-formed XML normalizes to an ordered key→value
//! structure:
//!
//! - attributes keyed `@name`, distinct from child elements
//! - repeated sibling tags collapsed into an array
//! - leaf elements become strings; mixed content keeps its text under
//!   `#text`
//!
//! Typed accessors cover the fields the engine actually reads; everything
//! else stays reachable through the generic map for forward compatibility.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

struct Node {
    name: String,
    map: Map<String, Value>,
    text: String,
}

fn finalize(node: Node) -> Value {
    if node.map.is_empty() {
        Value::String(node.text)
    } else {
        let mut map = node.map;
        if !node.text.is_empty() {
            map.insert("#text".to_string(), Value::String(node.text));
        }
        Value::Object(map)
    }
}

fn attach(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        None => {
            map.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Normalize an XML document into `(root_name, value)`
pub fn normalize(xml: &str) -> std::result::Result<(String, Value), String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut node = Node {
                    name,
                    map: Map::new(),
                    text: String::new(),
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| format!("bad attribute: {}", err))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map_err(|err| format!("bad attribute value: {}", err))?
                        .to_string();
                    node.map.insert(key, Value::String(value));
                }
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut map = Map::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| format!("bad attribute: {}", err))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map_err(|err| format!("bad attribute value: {}", err))?
                        .to_string();
                    map.insert(key, Value::String(value));
                }
                let value = finalize(Node {
                    name: name.clone(),
                    map,
                    text: String::new(),
                });
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.map, name, value),
                    None if root.is_none() => root = Some((name, value)),
                    None => return Err("multiple root elements".to_string()),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| format!("bad text node: {}", err))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let node = match stack.pop() {
                    Some(node) => node,
                    None => return Err("unbalanced closing tag".to_string()),
                };
                let name = node.name.clone();
                let value = finalize(node);
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.map, name, value),
                    None if root.is_none() => root = Some((name, value)),
                    None => return Err("multiple root elements".to_string()),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(format!("malformed XML: {}", err)),
        }
    }

    if !stack.is_empty() {
        return Err("unterminated element".to_string());
    }
    root.ok_or_else(|| "no root element".to_string())
}

/// A normalized gateway response
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GatewayResponse {
    root: String,
    body: Value,
    raw: String,
}

impl GatewayResponse {
    /// Parse a raw body into a normalized response
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let (root, body) = normalize(raw)?;
        Ok(Self {
            root,
            body,
            raw: raw.to_string(),
        })
    }

    /// Root element name
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The normalized map
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The raw body as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// String field lookup: the root's children first, then one level of
    /// nested objects (covers both `<payment_response><status>` and a bare
    /// `<status>` at the top)
    pub fn field(&self, name: &str) -> Option<&str> {
        let body = self.body.as_object()?;
        if let Some(value) = body.get(name).and_then(Value::as_str) {
            return Some(value);
        }
        for value in body.values() {
            if let Some(nested) = value.as_object() {
                if let Some(found) = nested.get(name).and_then(Value::as_str) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Gateway status string
    pub fn status(&self) -> Option<&str> {
        self.field("status")
    }

    /// Gateway-assigned transaction id
    pub fn unique_id(&self) -> Option<&str> {
        self.field("unique_id")
    }

    /// Locally generated transaction id echoed back
    pub fn transaction_id(&self) -> Option<&str> {
        self.field("transaction_id")
    }

    /// Error code
    pub fn code(&self) -> Option<&str> {
        self.field("code")
    }

    /// Error message
    pub fn message(&self) -> Option<&str> {
        self.field("message")
    }

    /// Technical error message
    pub fn technical_message(&self) -> Option<&str> {
        self.field("technical_message")
    }

    /// Total pages of a paginated listing, from the root's attributes
    pub fn pages_count(&self) -> Option<u32> {
        self.body
            .as_object()?
            .get("@pages_count")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// The records of a listing response, normalized to a list
    ///
    /// The gateway returns a single object for one result and an array for
    /// many; both shapes come back as a `Vec` here.
    pub fn records(&self) -> Vec<&Value> {
        let Some(body) = self.body.as_object() else {
            return Vec::new();
        };
        for (key, value) in body {
            if key.starts_with('@') || key == "#text" {
                continue;
            }
            match value {
                Value::Array(items) => return items.iter().collect(),
                Value::Object(_) => return vec![value],
                _ => {}
            }
        }
        Vec::new()
    }
}

/// String field lookup on one record of a listing response
pub fn record_field<'a>(record: &'a Value, name: &str) -> Option<&'a str> {
    record.as_object()?.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_elements_become_strings() {
        let (root, body) = normalize(
            "<payment_response><status>approved</status><unique_id>EMG-1</unique_id></payment_response>",
        )
        .unwrap();
        assert_eq!(root, "payment_response");
        assert_eq!(body["status"], "approved");
        assert_eq!(body["unique_id"], "EMG-1");
    }

    #[test]
    fn test_attributes_are_prefixed() {
        let (_, body) =
            normalize(r#"<response total_count="2"><status>ok</status></response>"#).unwrap();
        assert_eq!(body["@total_count"], "2");
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_repeated_siblings_collapse_into_array() {
        let (_, body) = normalize(
            "<responses><item><id>1</id></item><item><id>2</id></item><item><id>3</id></item></responses>",
        )
        .unwrap();
        assert_eq!(body["item"], json!([{"id": "1"}, {"id": "2"}, {"id": "3"}]));
    }

    #[test]
    fn test_single_child_stays_an_object() {
        let (_, body) = normalize("<responses><item><id>1</id></item></responses>").unwrap();
        assert_eq!(body["item"], json!({"id": "1"}));
    }

    #[test]
    fn test_entities_unescaped() {
        let (_, body) = normalize("<r><name>M&amp;M</name></r>").unwrap();
        assert_eq!(body["name"], "M&M");
    }

    #[test]
    fn test_malformed_is_an_error() {
        assert!(normalize("<r><open></r>").is_err());
        assert!(normalize("no xml here").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn test_field_reaches_one_nested_level() {
        let response = GatewayResponse::parse(
            "<payment_response><status>approved</status></payment_response>",
        )
        .unwrap();
        assert_eq!(response.status(), Some("approved"));

        let wrapped = GatewayResponse::parse(
            "<response><payment_response><status>approved</status><unique_id>EMG-1</unique_id></payment_response></response>",
        )
        .unwrap();
        assert_eq!(wrapped.status(), Some("approved"));
        assert_eq!(wrapped.unique_id(), Some("EMG-1"));
    }

    #[test]
    fn test_records_normalizes_one_vs_many() {
        let many = GatewayResponse::parse(
            r#"<chargeback_responses pages_count="1"><chargeback_response><unique_id>A</unique_id></chargeback_response><chargeback_response><unique_id>B</unique_id></chargeback_response></chargeback_responses>"#,
        )
        .unwrap();
        let records = many.records();
        assert_eq!(records.len(), 2);
        assert_eq!(record_field(records[0], "unique_id"), Some("A"));
        assert_eq!(many.pages_count(), Some(1));

        let one = GatewayResponse::parse(
            "<chargeback_responses><chargeback_response><unique_id>A</unique_id></chargeback_response></chargeback_responses>",
        )
        .unwrap();
        assert_eq!(one.records().len(), 1);
    }
}
