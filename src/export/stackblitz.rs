use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::config::types::ExportConfig;
use crate::error::{Result, SandlotError};
use crate::export::{ExportedProject, OpenOptions, ProjectExporter};

/// Opens projects on StackBlitz through its `/run` POST endpoint.
///
/// The browser has to issue the POST, so the exporter writes a small
/// self-submitting HTML form and hands it to the platform opener.
pub struct StackblitzExporter {
    base_url: String,
    out_dir: PathBuf,
    open_browser: bool,
}

impl StackblitzExporter {
    pub fn new(config: &ExportConfig, out_dir: PathBuf) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            out_dir,
            open_browser: config.open_browser,
        }
    }

    /// Write the form and, when enabled, open it. Returns the form's path.
    pub fn export(&self, project: &ExportedProject, options: &OpenOptions) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = self.out_dir.join(format!("export-{}.html", stamp));

        std::fs::write(&path, self.render_form(project, options))?;
        info!(path = %path.display(), files = project.files.len(), "Wrote StackBlitz export form");

        if self.open_browser {
            launch_opener(&path)?;
        }
        Ok(path)
    }

    /// Render the auto-submitting form for a project.
    pub fn render_form(&self, project: &ExportedProject, options: &OpenOptions) -> String {
        let action = format!(
            "{}/run?file={}",
            self.base_url,
            urlencoding::encode(&options.open_file)
        );

        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        let _ = writeln!(html, "<title>{}</title>", escape_html(&project.title));
        html.push_str("</head>\n<body>\n");
        let _ = writeln!(
            html,
            "<form id=\"sandlot-export\" method=\"post\" action=\"{}\">",
            escape_html(&action)
        );

        push_field(&mut html, "project[title]", &project.title);
        push_field(&mut html, "project[description]", &project.description);
        push_field(&mut html, "project[template]", &project.template);
        for file in project.files.files() {
            push_field(&mut html, &format!("project[files][{}]", file.path), &file.contents);
        }

        html.push_str("</form>\n");
        html.push_str("<script>document.getElementById('sandlot-export').submit();</script>\n");
        html.push_str("</body>\n</html>\n");
        html
    }
}

impl ProjectExporter for StackblitzExporter {
    fn open_project(&self, project: &ExportedProject, options: &OpenOptions) -> Result<()> {
        self.export(project, options).map(|_| ())
    }
}

fn push_field(html: &mut String, name: &str, value: &str) {
    let _ = writeln!(
        html,
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">",
        escape_html(name),
        escape_html(value)
    );
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Open a file with the platform's default handler without waiting on it.
fn launch_opener(path: &Path) -> Result<()> {
    open::that_detached(path)
        .map_err(|e| SandlotError::Export(format!("Failed to launch browser: {}", e)))?;

    debug!(path = %path.display(), "Launched opener");
    Ok(())
}
