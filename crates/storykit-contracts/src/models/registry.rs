use indexmap::IndexMap;

pub const CAPABILITY_VISION: &str = "vision";
pub const CAPABILITY_GENERATE: &str = "generate";
pub const CAPABILITY_EDIT: &str = "edit";

pub const GPT_IMAGE_1_VERSION: &str =
    "919e1bf061bd37ecb46e7d467ac952029cb5a5a9d195823832f5a17ec69e57d4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Replicate identifier, `owner/name`.
    pub name: String,
    pub capabilities: Vec<String>,
    /// Version hash to submit against. `None` means the model endpoint (or
    /// its latest version) is used.
    pub pinned_version: Option<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, capabilities: &[&str], pinned_version: Option<&str>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                pinned_version: pinned_version.map(str::to_string),
            },
        );
    };

    insert("openai/gpt-4o", &[CAPABILITY_VISION], None);
    insert(
        "openai/gpt-image-1",
        &[CAPABILITY_GENERATE],
        Some(GPT_IMAGE_1_VERSION),
    );
    insert("black-forest-labs/flux-kontext-pro", &[CAPABILITY_EDIT], None);

    map
}
