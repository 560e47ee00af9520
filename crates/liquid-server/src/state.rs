use std::sync::Arc;

use liquid::models::tool::ToolDefinition;
use liquid::providers::base::Model;

use crate::configuration::SuggestedAction;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn Model>,
    pub function_tools: Arc<Vec<ToolDefinition>>,
    pub suggestions: Arc<Vec<SuggestedAction>>,
}

impl AppState {
    pub fn new(
        model: Box<dyn Model>,
        function_tools: Vec<ToolDefinition>,
        suggestions: Vec<SuggestedAction>,
    ) -> Self {
        Self {
            model: Arc::from(model),
            function_tools: Arc::new(function_tools),
            suggestions: Arc::new(suggestions),
        }
    }
}
