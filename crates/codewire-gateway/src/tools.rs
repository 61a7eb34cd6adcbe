//! Tool descriptors for the agent's protocol layer.
//!
//! Pure functions, no state. The prose includes small illustrative agent
//! snippets; they are documentation, not code the gateway executes.

use serde::Serialize;
use serde_json::{json, Value};

use crate::SpecContext;

/// How many top tags the search description lists.
const TOP_TAGS: usize = 10;

/// What the embedder advertises for one tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Agent-facing prose.
    pub description: String,
    /// JSON schema of the input object.
    pub input_schema: Value,
}

/// Descriptor for the discovery tool.
pub fn search_descriptor(name: &str, context: Option<&SpecContext>) -> ToolDescriptor {
    let mut description = String::from(
        "Search the API specification to discover endpoints. Provide a JavaScript async \
         arrow function taking no arguments; its awaited return value (any JSON-serialisable \
         value) is the result. The processed OpenAPI document is available as the global \
         `spec`, with every $ref resolved inline — circular references appear as \
         { $circular: \"#/...\" } markers instead of pointers.\n\
         \n\
         Shape: spec.paths is an object keyed by full path (server base path included); \
         each path maps lower-case HTTP methods to \
         { summary, description, tags, parameters, requestBody, responses }.\n\
         \n\
         Example: `async () => Object.entries(spec.paths)\n\
         \x20 .filter(([path]) => path.includes(\"user\"))\n\
         \x20 .map(([path, ops]) => ({ path, methods: Object.keys(ops) }))`",
    );

    if let Some(context) = context {
        let top_tags: Vec<&str> = context
            .tags
            .iter()
            .take(TOP_TAGS)
            .map(String::as_str)
            .collect();
        description.push_str(&format!(
            "\n\nThis API has {} endpoints.",
            context.endpoint_count
        ));
        if !top_tags.is_empty() {
            description.push_str(&format!(" Most common tags: {}.", top_tags.join(", ")));
        }
    }

    ToolDescriptor {
        name: name.to_string(),
        description,
        input_schema: code_schema(
            "JavaScript async arrow function run against the `spec` global; its return \
             value is the search result",
        ),
    }
}

/// Descriptor for the execution tool.
pub fn execute_descriptor(name: &str, namespace: &str) -> ToolDescriptor {
    let description = format!(
        "Execute code against the API. Provide a JavaScript async arrow function taking no \
         arguments; its awaited return value is the result. Call the API with \
         `await {namespace}.request({{ method, path, query?, body?, headers? }})` — it \
         resolves to {{ status, headers, body }}, with `body` already JSON-parsed for \
         application/json responses.\n\
         \n\
         The code runs in an isolated sandbox: no filesystem, no network, no imports — \
         {namespace}.request() is the only way out, and requests per execution are capped.\n\
         \n\
         Example: `async () => {{\n\
         \x20 const pets = await {namespace}.request({{ method: \"GET\", path: \"/pets\", \
         query: {{ limit: 10 }} }});\n\
         \x20 return pets.body;\n\
         }}`"
    );

    ToolDescriptor {
        name: name.to_string(),
        description,
        input_schema: code_schema(
            "JavaScript async arrow function; call the API through the request binding and \
             return a JSON-serialisable value",
        ),
    }
}

fn code_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": description,
            }
        },
        "required": ["code"]
    })
}
