use image::ImageFormat;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

pub mod error;

/// One named image entry returned by the metadata endpoint.
///
/// `key` is the entry's key in the server mapping and the only value known
/// to be unique, so files and objects are named after it. Stages never
/// mutate a record in place: each one consumes the value and hands back a
/// new one carrying its own addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvaderRecord {
    pub key: String,
    pub name: String,
    /// `None` when the server sent no usable URL; only this record fails.
    pub image: Option<String>,
    pub local_path: Option<PathBuf>,
    pub remote_object: Option<String>,
}

impl InvaderRecord {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> InvaderRecord {
        let name = name.into();
        InvaderRecord::keyed(name.clone(), name, Some(image.into()))
    }

    pub fn keyed(key: String, name: String, image: Option<String>) -> InvaderRecord {
        InvaderRecord {
            key,
            name,
            image,
            local_path: None,
            remote_object: None,
        }
    }

    pub fn with_local_path(self, local_path: PathBuf) -> InvaderRecord {
        InvaderRecord {
            local_path: Some(local_path),
            ..self
        }
    }

    pub fn with_remote_object(self, remote_object: String) -> InvaderRecord {
        InvaderRecord {
            remote_object: Some(remote_object),
            ..self
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetadataResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    /// Records in the order the server listed them, one per key.
    #[serde(default, deserialize_with = "invaders_in_order")]
    pub invaders: Vec<InvaderRecord>,
}

/// Loosely typed so a malformed entry fails on its own, not the whole payload.
#[derive(Deserialize)]
struct InvaderEntry {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    image: Option<Value>,
}

impl InvaderEntry {
    fn into_record(self, key: Option<String>) -> Option<InvaderRecord> {
        let name = self
            .name
            .as_ref()
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let key = key.or_else(|| name.clone())?;
        let image = self.image.as_ref().and_then(Value::as_str).map(str::to_string);
        Some(InvaderRecord::keyed(key.clone(), name.unwrap_or(key), image))
    }
}

/// A repeated key keeps its first position but takes the later value.
fn push_keyed(records: &mut Vec<InvaderRecord>, record: InvaderRecord) {
    match records.iter_mut().find(|existing| existing.key == record.key) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

fn invaders_in_order<'de, D>(deserializer: D) -> Result<Vec<InvaderRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    struct InvadersVisitor;

    impl<'de> Visitor<'de> for InvadersVisitor {
        type Value = Vec<InvaderRecord>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of invader records keyed by name")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut records = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, entry)) = map.next_entry::<String, InvaderEntry>()? {
                let record = entry
                    .into_record(Some(key))
                    .ok_or_else(|| serde::de::Error::custom("invader without a name"))?;
                push_keyed(&mut records, record);
            }
            Ok(records)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut records = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(entry) = seq.next_element::<InvaderEntry>()? {
                let record = entry
                    .into_record(None)
                    .ok_or_else(|| serde::de::Error::custom("invader without a name"))?;
                push_keyed(&mut records, record);
            }
            Ok(records)
        }
    }

    deserializer.deserialize_any(InvadersVisitor)
}

pub trait ExtensionProvider {
    fn get_format_extension(&self) -> &'static str;
}

impl ExtensionProvider for ImageFormat {
    /// A little Pimp My Library pattern
    fn get_format_extension(&self) -> &'static str {
        self.extensions_str().first().copied().unwrap_or("jpg")
    }
}

/// Guesses the image format from a URL or file path.
pub fn image_format_for(path: &str) -> ImageFormat {
    ImageFormat::from_path(Path::new(path)).unwrap_or_else(|_| {
        warn!("Defaulting to Jpeg format for {path}");
        ImageFormat::Jpeg
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invaders_keep_server_order() {
        let body = r#"{"code":0,"invaders":{
            "zeta":{"name":"zeta","image":"http://x/z.jpg"},
            "alpha":{"name":"alpha","image":"http://x/a.jpg"},
            "mid":{"name":"mid","image":"http://x/m.png"}}}"#;
        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        let names: Vec<&str> = response.invaders.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert!(response.invaders.iter().all(|r| r.local_path.is_none()));
    }

    #[test]
    fn missing_name_falls_back_to_key() {
        let response: MetadataResponse = serde_json::from_value(json!({
            "code": 0,
            "invaders": { "PA_01": { "image": "http://x/1.jpg", "points": 10 } }
        }))
        .unwrap();
        assert_eq!(response.invaders, vec![InvaderRecord::new("PA_01", "http://x/1.jpg")]);
    }

    #[test]
    fn repeated_key_replaces_earlier_entry() {
        let body = r#"{"code":0,"invaders":{
            "a":{"image":"http://x/old.jpg"},
            "b":{"image":"http://x/b.jpg"},
            "a":{"image":"http://x/new.jpg"}}}"#;
        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.invaders,
            vec![
                InvaderRecord::new("a", "http://x/new.jpg"),
                InvaderRecord::new("b", "http://x/b.jpg"),
            ]
        );
    }

    #[test]
    fn shared_name_keeps_distinct_keys() {
        let response: MetadataResponse = serde_json::from_value(json!({
            "code": 0,
            "invaders": {
                "k1": { "name": "x", "image": "http://x/1.jpg" },
                "k2": { "name": "x", "image": "http://x/2.jpg" }
            }
        }))
        .unwrap();
        let keys: Vec<&str> = response.invaders.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["k1", "k2"]);
        assert!(response.invaders.iter().all(|r| r.name == "x"));
    }

    #[test]
    fn malformed_image_only_affects_its_record() {
        let body = r#"{"code":0,"invaders":{
            "ok":{"name":"ok","image":"http://x/ok.jpg"},
            "null":{"name":"null","image":null},
            "missing":{"name":"missing"},
            "number":{"name":"number","image":42}}}"#;
        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        let images: Vec<Option<&str>> =
            response.invaders.iter().map(|r| r.image.as_deref()).collect();
        assert_eq!(images, [Some("http://x/ok.jpg"), None, None, None]);
    }

    #[test]
    fn error_payload_without_invaders() {
        let response: MetadataResponse =
            serde_json::from_value(json!({ "code": 1, "message": "bad uid" })).unwrap();
        assert_eq!(response.code, 1);
        assert_eq!(response.message.as_deref(), Some("bad uid"));
        assert!(response.invaders.is_empty());
    }

    #[test]
    fn null_and_empty_array_mean_no_invaders() {
        let null: MetadataResponse =
            serde_json::from_value(json!({ "code": 0, "invaders": null })).unwrap();
        let empty: MetadataResponse =
            serde_json::from_value(json!({ "code": 0, "invaders": [] })).unwrap();
        assert!(null.invaders.is_empty());
        assert!(empty.invaders.is_empty());
    }

    #[test]
    fn stages_return_new_values() {
        let fetched = InvaderRecord::new("ship1", "http://x/1.jpg");
        let downloaded = fetched.clone().with_local_path(PathBuf::from("/tmp/ship1.jpg"));
        let uploaded = downloaded.clone().with_remote_object("gs://b/ship1.jpg".to_string());

        assert_eq!(fetched.local_path, None);
        assert_eq!(downloaded.name, fetched.name);
        assert_eq!(uploaded.local_path, downloaded.local_path);
        assert_eq!(uploaded.remote_object.as_deref(), Some("gs://b/ship1.jpg"));
    }

    #[test]
    fn format_extension_from_url() {
        assert_eq!(image_format_for("/img/1.png").get_format_extension(), "png");
        assert_eq!(image_format_for("/img/1.jpeg").get_format_extension(), "jpg");
        assert_eq!(image_format_for("/img/no-extension").get_format_extension(), "jpg");
    }
}
