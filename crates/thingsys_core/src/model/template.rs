//! Built-in component templates.

use crate::model::thing::ComponentBundle;

/// Build-time version of the system Thing definition.
///
/// Bumping it forces a reconcile on the next boot even when the template
/// sources are byte-identical.
pub const SYSTEM_VERSION: u32 = 2;

/// Display name of the system Thing.
pub const SYSTEM_THING_NAME: &str = "Thing System";

const DEFAULT_HTML: &str = r#"<div id="app">
    <h1>Hello from New Thing!</h1>
</div>
"#;

const DEFAULT_CSS: &str = r#"body {
    font-family: system-ui;
    margin: 0;
    padding: 20px;
    background: #f0f0f0;
}

#app {
    max-width: 800px;
    margin: 0 auto;
    background: white;
    padding: 20px;
    border-radius: 8px;
    box-shadow: 0 2px 4px rgba(0,0,0,0.1);
}
"#;

const DEFAULT_CLIENT_JS: &str = "// Client-side code goes here\nconsole.log('Thing is running!');\n";

const DEFAULT_SERVER_JS: &str = "# Server-side declarations go here\n";

/// Components every newly created Thing starts from.
pub fn default_components() -> ComponentBundle {
    ComponentBundle {
        html: DEFAULT_HTML.to_string(),
        css: DEFAULT_CSS.to_string(),
        client_js: DEFAULT_CLIENT_JS.to_string(),
        server_js: DEFAULT_SERVER_JS.to_string(),
    }
}
