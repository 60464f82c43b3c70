//! Notion API wire types, limited to the fields this service reads.
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    pub title: Vec<Value>,
    pub properties: HashMap<String, DatabaseProperty>,
}

/// One page of a paginated list endpoint (database query, block children).
#[derive(Deserialize, Debug)]
pub struct ListResp<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

/// Page property values, tagged by Notion's `type` field.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title {
        title: Vec<RichText>,
    },
    RichText {
        rich_text: Vec<RichText>,
    },
    Date {
        date: Option<DateValue>,
    },
    Select {
        select: Option<SelectOption>,
    },
    Status {
        status: Option<SelectOption>,
    },
    Checkbox {
        checkbox: bool,
    },
    #[serde(other)]
    Other,
}

impl PropertyValue {
    /// Concatenated plain text of a title or rich-text property.
    pub fn plain_text(&self) -> Option<String> {
        let segments = match self {
            PropertyValue::Title { title } => title,
            PropertyValue::RichText { rich_text } => rich_text,
            _ => return None,
        };
        let text: String = segments.iter().map(|t| t.plain_text.as_str()).collect();
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    /// Option name of a select or status property.
    pub fn option_name(&self) -> Option<String> {
        match self {
            PropertyValue::Select { select: Some(opt) }
            | PropertyValue::Status { status: Some(opt) } => {
                let name = opt.name.trim();
                (!name.is_empty()).then(|| name.to_string())
            }
            _ => None,
        }
    }

    pub fn date_start(&self) -> Option<&str> {
        match self {
            PropertyValue::Date { date: Some(d) } => Some(d.start.as_str()),
            _ => None,
        }
    }

    pub fn checkbox(&self) -> Option<bool> {
        match self {
            PropertyValue::Checkbox { checkbox } => Some(*checkbox),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DateValue {
    pub start: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Annotations {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub code: bool,
}

/// A content block. The type-specific payload is kept as raw JSON under
/// `data` and read by the Markdown renderer.
#[derive(Deserialize, Debug, Clone)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
    /// Filled in by the client after fetching nested blocks.
    #[serde(skip)]
    pub children: Vec<Block>,
}

impl Block {
    /// The payload object stored under the block's own type key.
    pub fn payload(&self) -> Option<&Value> {
        self.data.get(&self.typ)
    }

    /// Rich-text segments of the block payload, if any.
    pub fn rich_text(&self) -> Vec<RichText> {
        self.payload()
            .and_then(|p| p.get("rich_text"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}
