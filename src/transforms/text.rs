//! Serialisers, converters and templates.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::marker::PhantomData;

use crate::core::error::IntoError;
use crate::core::{Error, Result, Transform};

macro_rules! serialiser {
    ($(#[$meta:meta])* $name:ident, $ctor:ident, |$item:ident| $body:expr) => {
        $(#[$meta])*
        pub struct $name<T>(PhantomData<fn(T) -> String>);

        impl<T> $name<T> {
            pub fn new() -> Self {
                Self(PhantomData)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        pub fn $ctor<T>() -> $name<T> {
            $name::new()
        }

        #[async_trait]
        impl<T: Serialize + Send + 'static> Transform for $name<T> {
            type Input = T;
            type Output = String;

            async fn apply(&mut self, $item: T) -> Result<String> {
                $body
            }
        }
    };
}

serialiser!(
    /// Compact JSON.
    ToJson,
    to_json,
    |item| serde_json::to_string(&item).into_transform_error()
);

serialiser!(
    /// Indented JSON.
    ToPrettyJson,
    to_pretty_json,
    |item| serde_json::to_string_pretty(&item).into_transform_error()
);

serialiser!(
    /// A YAML document.
    ToYaml,
    to_yaml,
    |item| serde_yaml::to_string(&item).into_transform_error()
);

/// Parses JSON text into `T`.
pub struct FromJson<T>(PhantomData<fn(String) -> T>);

impl<T> FromJson<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for FromJson<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn from_json<T>() -> FromJson<T> {
    FromJson::new()
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> Transform for FromJson<T> {
    type Input = String;
    type Output = T;

    async fn apply(&mut self, item: String) -> Result<T> {
        serde_json::from_str(&item).into_transform_error()
    }
}

/// The value's `Display` form.
pub struct Stringify<T>(PhantomData<fn(T) -> String>);

pub fn to_string<T>() -> Stringify<T> {
    Stringify(PhantomData)
}

#[async_trait]
impl<T: Display + Send + 'static> Transform for Stringify<T> {
    type Input = T;
    type Output = String;

    async fn apply(&mut self, item: T) -> Result<String> {
        Ok(item.to_string())
    }
}

/// Substitutes the value's `Display` form for every `{}` in a format
/// string.
pub struct Stringifyf<T> {
    format: String,
    _phantom: PhantomData<fn(T) -> String>,
}

pub fn to_stringf<T>(format: impl Into<String>) -> Stringifyf<T> {
    Stringifyf {
        format: format.into(),
        _phantom: PhantomData,
    }
}

pub(crate) fn substitute(format: &str, value: &impl Display) -> String {
    format.replace("{}", &value.to_string())
}

#[async_trait]
impl<T: Display + Send + 'static> Transform for Stringifyf<T> {
    type Input = T;
    type Output = String;

    async fn apply(&mut self, item: T) -> Result<String> {
        Ok(substitute(&self.format, &item))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringToBytes;

pub fn string_to_bytes() -> StringToBytes {
    StringToBytes
}

#[async_trait]
impl Transform for StringToBytes {
    type Input = String;
    type Output = Vec<u8>;

    async fn apply(&mut self, item: String) -> Result<Vec<u8>> {
        Ok(item.into_bytes())
    }
}

/// Fails on invalid UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesToString;

pub fn bytes_to_string() -> BytesToString {
    BytesToString
}

#[async_trait]
impl Transform for BytesToString {
    type Input = Vec<u8>;
    type Output = String;

    async fn apply(&mut self, item: Vec<u8>) -> Result<String> {
        String::from_utf8(item).into_transform_error()
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
});

/// Renders a template against the value's JSON form.
///
/// `{}` is replaced with the whole value, `{a.b.0}` with the field found by
/// walking object keys and array indices. Strings render bare, other values
/// as JSON. A placeholder that resolves to nothing is an error.
pub struct Format<T> {
    template: String,
    _phantom: PhantomData<fn(T) -> String>,
}

pub fn format<T>(template: impl Into<String>) -> Format<T> {
    Format {
        template: template.into(),
        _phantom: PhantomData,
    }
}

fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl<T: Serialize + Send + 'static> Transform for Format<T> {
    type Input = T;
    type Output = String;

    async fn apply(&mut self, item: T) -> Result<String> {
        let value = serde_json::to_value(&item).into_transform_error()?;
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures| {
            match resolve(&value, &caps[1]) {
                Some(found) => render(found),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(path) => Err(Error::custom(format!("template field {{{}}} not found", path))),
            None => Ok(rendered.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Instance {
        id: String,
        vcpus: u32,
        tags: Vec<String>,
    }

    fn instance() -> Instance {
        Instance {
            id: "i-1".into(),
            vcpus: 4,
            tags: vec!["web".into()],
        }
    }

    #[tokio::test]
    async fn test_serialisers() {
        assert_eq!(
            to_json().apply(instance()).await.unwrap(),
            r#"{"id":"i-1","vcpus":4,"tags":["web"]}"#
        );
        assert!(to_pretty_json().apply(instance()).await.unwrap().contains("\n  \"id\""));
        assert!(to_yaml().apply(instance()).await.unwrap().contains("vcpus: 4"));
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let text = to_json().apply(instance()).await.unwrap();
        let back: Instance = from_json().apply(text).await.unwrap();
        assert_eq!(back, instance());
        assert!(from_json::<Instance>().apply("{".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_string_forms() {
        assert_eq!(to_string().apply(42).await.unwrap(), "42");
        assert_eq!(to_stringf("<{}>").apply(7).await.unwrap(), "<7>");
    }

    #[tokio::test]
    async fn test_bytes_round_trip() {
        let bytes = string_to_bytes().apply("héllo".to_string()).await.unwrap();
        assert_eq!(bytes_to_string().apply(bytes).await.unwrap(), "héllo");
        assert!(bytes_to_string().apply(vec![0xff, 0xfe]).await.is_err());
    }

    #[tokio::test]
    async fn test_format_template() {
        let mut template = format("{id} has {vcpus} vcpus, first tag {tags.0}");
        assert_eq!(
            template.apply(instance()).await.unwrap(),
            "i-1 has 4 vcpus, first tag web"
        );

        let mut whole = format("value={}");
        assert_eq!(whole.apply(json!({"a": 1})).await.unwrap(), r#"value={"a":1}"#);

        let mut broken = format::<Instance>("{nope}");
        assert!(broken.apply(instance()).await.is_err());
    }
}
