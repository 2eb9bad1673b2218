use crate::core::RenderError;
use serde_json::Value;

/// Turns a named template and its data into a response body.
pub trait Renderer: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> Result<String, RenderError>;
}

/// Default renderer for applications that serve no templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRenderer;

impl Renderer for NoRenderer {
    fn render(&self, name: &str, _data: &Value) -> Result<String, RenderError> {
        Err(RenderError::NotConfigured(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_renderer_refuses_every_template() {
        let err = NoRenderer.render("index.html", &Value::Null).unwrap_err();
        assert_eq!(err, RenderError::NotConfigured("index.html".into()));
    }
}
