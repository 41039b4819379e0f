//! Compiler configuration.

use serde::{Deserialize, Serialize};

use crate::naming::normalize_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Prefix of every generated scope class (`<prefix>-<Name>`).
    pub style_prefix: String,
    /// Run the style scoping engine. When off, `<style>` blocks are discarded.
    pub style: bool,
    /// Global stylesheet transpiled once and prepended to component styles.
    pub style_input_file: Option<String>,
    /// Wrap inlined components and partials in marker comments.
    pub component_comments: bool,
    /// Promote every compile warning to an error.
    pub strict: bool,
    pub sass_executable: String,
    /// Log every final template at debug level.
    pub print_render_output: bool,
    /// Where `generate` writes the accessor module.
    pub generation_output_file: Option<String>,
    /// Source extensions picked up by discovery.
    pub extensions: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            style_prefix: "melt".to_string(),
            style: true,
            style_input_file: None,
            component_comments: false,
            strict: false,
            sass_executable: "sass".to_string(),
            print_render_output: false,
            generation_output_file: None,
            extensions: vec![".html".to_string()],
        }
    }
}

impl CompileOptions {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut options: CompileOptions = serde_json::from_str(raw)?;
        options.style_input_file = options.style_input_file.map(|p| normalize_path(&p));
        Ok(options)
    }

    pub fn with_style_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.style_prefix = prefix.into();
        self
    }

    pub fn with_component_comments(mut self, value: bool) -> Self {
        self.component_comments = value;
        self
    }

    pub fn with_strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }

    pub fn with_style(mut self, value: bool) -> Self {
        self.style = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let options = CompileOptions::from_json(r#"{ "stylePrefix": "s", "strict": true }"#).unwrap();
        assert_eq!(options.style_prefix, "s");
        assert!(options.strict);
        assert!(options.style);
        assert_eq!(options.sass_executable, "sass");
        assert_eq!(options.extensions, vec![".html".to_string()]);
    }

    #[test]
    fn test_style_input_file_is_normalized() {
        let options = CompileOptions::from_json(r#"{ "styleInputFile": "Styles\\..\\Main.scss" }"#).unwrap();
        assert_eq!(options.style_input_file.as_deref(), Some("main.scss"));
    }
}
