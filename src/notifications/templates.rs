//! Renders alert message bodies (§4.4 notification templates) with Tera, the same templating
//! engine the teacher exposes to channel body templates (`{{ vps_name }}`-style placeholders).

use std::collections::HashMap;

use tera::{Context, Tera};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template configured for key '{0}'")]
    MissingTemplate(String),
    #[error("template render failed: {0}")]
    Render(#[from] tera::Error),
}

pub fn render(
    bodies: &HashMap<String, String>,
    template_key: &str,
    vars: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let template = bodies
        .get(template_key)
        .ok_or_else(|| TemplateError::MissingTemplate(template_key.to_string()))?;

    let mut context = Context::new();
    for (k, v) in vars {
        context.insert(k, v);
    }
    Tera::one_off(template, &context, false).map_err(TemplateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let mut bodies = HashMap::new();
        bodies.insert("cpu".to_string(), "{{ ServerName }} is at {{ Value }}%".to_string());
        let mut vars = HashMap::new();
        vars.insert("ServerName".to_string(), "web-1".to_string());
        vars.insert("Value".to_string(), "97.5".to_string());
        let rendered = render(&bodies, "cpu", &vars).unwrap();
        assert_eq!(rendered, "web-1 is at 97.5%");
    }

    #[test]
    fn missing_template_is_an_error() {
        let bodies = HashMap::new();
        assert!(render(&bodies, "cpu", &HashMap::new()).is_err());
    }
}
