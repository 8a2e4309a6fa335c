use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::script::RenderError;

/// `#PBS -S /bin/bash` followed by a blank line, prepended to most scripts
pub static BASH_HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/bash_header.txt"));
pub static GET_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/get_data.txt"));
pub static CLEAN_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/clean_data.txt"));
pub static PUT_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/put_data.txt"));
pub static CHECK_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/check_data.txt"));
pub static MARK_COMPLETE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/mark_complete.txt"));

/// Render one template with TinyTemplate
///
/// Values are inserted verbatim. The default formatter HTML-escapes, which would corrupt
/// passwords and paths containing `&`, `<` or quotes.
pub fn render<C: Serialize>(name: &'static str, template: &'static str, context: &C) -> Result<String, RenderError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, template)
        .map_err(|source| RenderError::Template { name, source })?;
    tt.render(name, context)
        .map_err(|source| RenderError::Template { name, source })
}

/// Render a template and put the bash header in front of it
pub fn render_with_header<C: Serialize>(name: &'static str, template: &'static str, context: &C) -> Result<String, RenderError> {
    let body = render(name, template, context)?;
    Ok(format!("{BASH_HEADER}{body}"))
}
