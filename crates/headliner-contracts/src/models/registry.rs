use indexmap::IndexMap;

/// Request shape a model expects on top of the common body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Accepts a sub-model and a creative-detailing level.
    Mystic,
    Flux,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub label: String,
    pub path: String,
    pub family: ModelFamily,
}

impl ModelSpec {
    pub fn endpoint(&self, api_base: &str) -> String {
        format!(
            "{}/{}",
            api_base.trim().trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
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

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// The first registered model; requests for unknown ids land here.
    pub fn default_model(&self) -> Option<&ModelSpec> {
        self.models.values().next()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, label: &str, path: &str, family: ModelFamily| {
        map.insert(
            id.to_string(),
            ModelSpec {
                id: id.to_string(),
                label: label.to_string(),
                path: path.to_string(),
                family,
            },
        );
    };

    insert(
        "mystic",
        "Mystic (Best for illustrations)",
        "ai/mystic",
        ModelFamily::Mystic,
    );
    insert(
        "flux-dev",
        "Flux Dev (Fast, good quality)",
        "ai/text-to-image/flux-dev",
        ModelFamily::Flux,
    );
    insert(
        "flux-pro",
        "Flux Pro 1.1 (Premium quality)",
        "ai/text-to-image/flux-pro-v1-1",
        ModelFamily::Flux,
    );
    insert(
        "flux-2-pro",
        "Flux 2 Pro (Latest premium)",
        "ai/text-to-image/flux-2-pro",
        ModelFamily::Flux,
    );
    insert(
        "flux-2-turbo",
        "Flux 2 Turbo (Fast premium)",
        "ai/text-to-image/flux-2-turbo",
        ModelFamily::Flux,
    );
    insert(
        "hyperflux",
        "HyperFlux (Ultra fast)",
        "ai/text-to-image/hyperflux",
        ModelFamily::Flux,
    );

    map
}
