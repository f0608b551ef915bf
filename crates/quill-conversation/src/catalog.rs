use async_trait::async_trait;
use quill_core::{Model, ModelCatalog, Result};

/// Model catalog taken from the configuration file.
#[derive(Debug, Clone)]
pub struct ConfiguredCatalog {
    models: Vec<Model>,
}

impl ConfiguredCatalog {
    pub fn new(mut models: Vec<Model>) -> Self {
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Self { models }
    }
}

#[async_trait]
impl ModelCatalog for ConfiguredCatalog {
    async fn list_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.clone())
    }
}

/// Looks up `id`, falling back to the first catalog entry when it is unknown.
pub fn find_model<'a>(models: &'a [Model], id: &str) -> Option<&'a Model> {
    models.iter().find(|m| m.id == id).or_else(|| models.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, name: &str) -> Model {
        Model {
            id: id.into(),
            name: name.into(),
            context_window: 4096,
            cost_per_1k: 0.0,
        }
    }

    #[tokio::test]
    async fn test_models_sorted_by_name() {
        let catalog = ConfiguredCatalog::new(vec![model("b", "Zeta"), model("a", "Alpha")]);
        let models = catalog.list_models().await.unwrap();
        assert_eq!(models[0].name, "Alpha");
        assert_eq!(models[1].name, "Zeta");
    }

    #[test]
    fn test_find_model_falls_back_to_first() {
        let models = vec![model("a", "Alpha"), model("b", "Beta")];
        assert_eq!(find_model(&models, "b").unwrap().id, "b");
        assert_eq!(find_model(&models, "unknown").unwrap().id, "a");
        assert!(find_model(&[], "a").is_none());
    }
}
