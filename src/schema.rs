//! Declared shape of a structured model response.
//!
//! A [`ResponseShape`] is a static, machine-readable description of the
//! fields a reply must carry. The output parser renders it into format
//! instructions and checks candidate payloads against it before
//! deserializing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Array(&'static FieldType),
}

impl FieldType {
    pub fn json_schema(&self) -> Value {
        match self {
            FieldType::String => json!({"type": "string"}),
            FieldType::Array(items) => json!({
                "type": "array",
                "items": items.json_schema(),
            }),
        }
    }

    /// Human-readable type name used in validation messages.
    pub fn type_name(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Array(items) => format!("array<{}>", items.type_name()),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Array(items) => value
                .as_array()
                .is_some_and(|values| values.iter().all(|item| items.matches(item))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseShape {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ResponseShape {
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let mut schema = field.field_type.json_schema();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert(
                    "description".to_string(),
                    Value::String(field.description.to_string()),
                );
            }
            properties.insert(field.name.to_string(), schema);
        }

        let required = self
            .fields
            .iter()
            .map(|field| Value::String(field.name.to_string()))
            .collect::<Vec<_>>();

        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks that `value` is an object carrying every declared field with
    /// the declared type. Unknown keys are ignored.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "expected a JSON object at the root".to_string())?;

        for field in self.fields {
            let Some(field_value) = obj.get(field.name) else {
                return Err(format!("missing required field: {}", field.name));
            };
            if !field.field_type.matches(field_value) {
                return Err(format!(
                    "field '{}' must be of type {}",
                    field.name,
                    field.field_type.type_name()
                ));
            }
        }

        Ok(())
    }
}

/// A Rust type that can be produced by a model as structured output.
pub trait StructuredOutput: Serialize + DeserializeOwned {
    fn shape() -> &'static ResponseShape;
}

/// Result of a research query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub topic: String,
    pub summary: String,
    pub sources: Vec<String>,
    #[serde(rename = "toolsUsed")]
    pub tools_used: Vec<String>,
}

static STRING_ITEMS: FieldType = FieldType::String;

static RESEARCH_RESPONSE_FIELDS: [FieldSpec; 4] = [
    FieldSpec {
        name: "topic",
        field_type: FieldType::String,
        description: "Subject of the research query",
    },
    FieldSpec {
        name: "summary",
        field_type: FieldType::String,
        description: "Concise answer to the query",
    },
    FieldSpec {
        name: "sources",
        field_type: FieldType::Array(&STRING_ITEMS),
        description: "References the summary draws on",
    },
    FieldSpec {
        name: "toolsUsed",
        field_type: FieldType::Array(&STRING_ITEMS),
        description: "Names of tools consulted while answering",
    },
];

static RESEARCH_RESPONSE_SHAPE: ResponseShape = ResponseShape {
    name: "ResearchResponse",
    fields: &RESEARCH_RESPONSE_FIELDS,
};

impl StructuredOutput for ResearchResponse {
    fn shape() -> &'static ResponseShape {
        &RESEARCH_RESPONSE_SHAPE
    }
}
