//! Renderer: LaTeX source -> PNG on disk.
//!
//! `LatexRenderer` runs `latex` then `dvipng` in a private build directory next to the
//! destination. A rejection by LaTeX itself is a content error (the user's fault); anything
//! else (missing binaries, a broken TeX installation, unwritable paths, dvipng failures) is a
//! system error.
//!
//! File access from inside the document is limited by kpathsea's paranoid mode
//! (`openin_any=p`, `openout_any=p`): no absolute paths, no `..`, no dotfiles.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

use super::artifact::Artifact;
use crate::config::RenderConfig;
use crate::exec;

const JOB_NAME: &str = "job";
const MAX_ERROR_CHARS: usize = 200;

const PREAMBLE: &str = "\\documentclass[preview,border=4pt]{standalone}\n\
\\usepackage{amsmath}\n\
\\usepackage{amssymb}\n";

/// Classes and packages loaded by `PREAMBLE`; if one is missing the installation is broken.
const PREAMBLE_FILES: &[&str] = &["standalone.cls", "amsmath.sty", "amssymb.sty"];

/// Environment for the latex child. Applies however the document spells its file primitives.
const LATEX_ENV: &[(&str, &str)] = &[("openin_any", "p"), ("openout_any", "p")];

/// Primitives that read or write files from inside the document. Checked before latex runs
/// so the common cases get a clear message.
const FORBIDDEN_COMMANDS: &[&str] = &[
    "\\input",
    "\\include",
    "\\openin",
    "\\openout",
    "\\write",
    "\\immediate",
    "\\catcode",
];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The source was rejected by the typesetter; message is safe to show the user.
    #[error("{0}")]
    Content(String),
    /// Toolchain or filesystem failure; details are for the log only.
    #[error("render failed: {0}")]
    System(String),
}

/// Renders source text into an image at `destination`.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, source: &str, destination: &Path) -> Result<Artifact, RenderError>;
}

/// Renderer backed by a local TeX installation (latex + dvipng).
#[derive(Debug, Clone)]
pub struct LatexRenderer {
    latex_bin: String,
    dvipng_bin: String,
    dpi: u32,
    background: String,
}

impl LatexRenderer {
    pub fn new(
        latex_bin: impl Into<String>,
        dvipng_bin: impl Into<String>,
        dpi: u32,
        background: impl Into<String>,
    ) -> Self {
        Self {
            latex_bin: latex_bin.into(),
            dvipng_bin: dvipng_bin.into(),
            dpi,
            background: background.into(),
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(
            config.latex_bin.clone(),
            config.dvipng_bin.clone(),
            config.dpi,
            config.background.clone(),
        )
    }

    async fn render_in(
        &self,
        source: &str,
        destination: &Path,
        build_dir: &Path,
    ) -> Result<Artifact, RenderError> {
        tokio::fs::create_dir_all(build_dir).await.map_err(|e| {
            RenderError::System(format!("creating build dir {}: {}", build_dir.display(), e))
        })?;
        let tex_path = build_dir.join(format!("{}.tex", JOB_NAME));
        tokio::fs::write(&tex_path, wrap_document(source))
            .await
            .map_err(|e| RenderError::System(format!("writing {}: {}", tex_path.display(), e)))?;

        let latex_args = vec![
            "-interaction=nonstopmode".to_string(),
            "-halt-on-error".to_string(),
            "-no-shell-escape".to_string(),
            format!("{}.tex", JOB_NAME),
        ];
        let out = exec::run(&self.latex_bin, &latex_args, build_dir, LATEX_ENV)
            .await
            .map_err(|e| RenderError::System(e.to_string()))?;
        if !out.success {
            let log_path = build_dir.join(format!("{}.log", JOB_NAME));
            let log = tokio::fs::read_to_string(&log_path)
                .await
                .unwrap_or_else(|_| out.stdout.clone());
            return Err(match classify_failure(&log, !is_full_document(source)) {
                Some(e) => e,
                None => RenderError::System(format!(
                    "{} exited with {:?}: {}",
                    self.latex_bin,
                    out.code,
                    out.combined().trim()
                )),
            });
        }

        let output = std::path::absolute(destination).map_err(|e| {
            RenderError::System(format!("resolving {}: {}", destination.display(), e))
        })?;
        let dvipng_args = vec![
            "-q".to_string(),
            "-T".to_string(),
            "tight".to_string(),
            "-D".to_string(),
            self.dpi.to_string(),
            "-bg".to_string(),
            self.background.clone(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            format!("{}.dvi", JOB_NAME),
        ];
        let out = exec::run(&self.dvipng_bin, &dvipng_args, build_dir, &[])
            .await
            .map_err(|e| RenderError::System(e.to_string()))?;
        if !out.success {
            return Err(RenderError::System(format!(
                "{} exited with {:?}: {}",
                self.dvipng_bin,
                out.code,
                out.combined().trim()
            )));
        }

        let bytes = tokio::fs::read(destination).await.map_err(|e| {
            RenderError::System(format!("reading {}: {}", destination.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(RenderError::System(format!(
                "{} produced an empty image",
                self.dvipng_bin
            )));
        }
        Ok(Artifact {
            path: destination.to_path_buf(),
            bytes,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Renderer for LatexRenderer {
    async fn render(&self, source: &str, destination: &Path) -> Result<Artifact, RenderError> {
        check_source(source)?;
        let build_dir = build_dir_for(destination);
        let result = self.render_in(source, destination, &build_dir).await;
        if let Err(e) = tokio::fs::remove_dir_all(&build_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove build dir {}: {}", build_dir.display(), e);
            }
        }
        result
    }
}

fn build_dir_for(destination: &Path) -> PathBuf {
    destination.with_extension("build")
}

/// Reject sources using primitives that touch the filesystem.
pub fn check_source(source: &str) -> Result<(), RenderError> {
    match FORBIDDEN_COMMANDS.iter().find(|c| source.contains(*c)) {
        Some(cmd) => Err(RenderError::Content(format!("{} is not allowed", cmd))),
        None => Ok(()),
    }
}

/// Wrap source in a standalone document. A complete document (with `\documentclass`) is used
/// as-is; source without math delimiters or environments is typeset as display math.
pub fn wrap_document(source: &str) -> String {
    if is_full_document(source) {
        return source.to_string();
    }
    let has_math = source.contains('$')
        || source.contains("\\[")
        || source.contains("\\(")
        || source.contains("\\begin{");
    let body = if has_math {
        source.to_string()
    } else {
        format!("$\\displaystyle {}$", source)
    };
    format!("{}\\begin{{document}}\n{}\n\\end{{document}}\n", PREAMBLE, body)
}

fn is_full_document(source: &str) -> bool {
    source.contains("\\documentclass")
}

/// First error of a TeX log: the `! ` line and, when present, the `l.<n>` input line.
#[derive(Debug, PartialEq, Eq)]
struct LogError<'a> {
    message: &'a str,
    line: Option<usize>,
}

fn parse_log_error(log: &str) -> Option<LogError<'_>> {
    let mut lines = log.lines();
    let message = lines
        .by_ref()
        .find_map(|l| l.strip_prefix("! "))
        .map(str::trim)
        .filter(|l| !l.is_empty())?;
    let line = lines
        .take_while(|l| !l.starts_with("! "))
        .find_map(|l| l.strip_prefix("l."))
        .and_then(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        });
    Some(LogError { message, line })
}

/// `name` from "... File `name' not found ...".
fn missing_file(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once("File `")?;
    let (name, tail) = rest.split_once('\'')?;
    tail.starts_with(" not found").then_some(name)
}

/// Decide who is at fault for a failed latex run. `wrapped` is true when the source was put
/// behind `PREAMBLE`; an error inside those lines, or a missing file the preamble loads,
/// is an installation problem. None when the log has no error line.
fn classify_failure(log: &str, wrapped: bool) -> Option<RenderError> {
    let error = parse_log_error(log)?;
    let missing_preamble_file = missing_file(error.message)
        .is_some_and(|name| PREAMBLE_FILES.contains(&name));
    let in_preamble =
        wrapped && error.line.is_some_and(|n| (1..=PREAMBLE.lines().count()).contains(&n));
    if missing_preamble_file || in_preamble {
        Some(RenderError::System(format!(
            "TeX installation problem: {} (line {:?})",
            error.message, error.line
        )))
    } else {
        Some(RenderError::Content(truncate_error(error.message)))
    }
}

fn truncate_error(line: &str) -> String {
    if line.chars().count() > MAX_ERROR_CHARS {
        let cut: String = line.chars().take(MAX_ERROR_CHARS).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

/// First `! ...` error line of a TeX log, without the marker, truncated for chat.
pub fn first_latex_error(log: &str) -> Option<String> {
    parse_log_error(log).map(|e| truncate_error(e.message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_source_becomes_display_math() {
        let doc = wrap_document("E=mc^2");
        assert!(doc.starts_with("\\documentclass[preview,border=4pt]{standalone}"));
        assert!(doc.contains("\\begin{document}\n$\\displaystyle E=mc^2$\n\\end{document}"));
    }

    #[test]
    fn source_with_delimiters_is_kept() {
        let doc = wrap_document("Energy: $E=mc^2$");
        assert!(doc.contains("\\begin{document}\nEnergy: $E=mc^2$\n\\end{document}"));
        let doc = wrap_document("\\begin{align} a &= b \\end{align}");
        assert!(!doc.contains("\\displaystyle"));
    }

    #[test]
    fn full_document_is_verbatim() {
        let src = "\\documentclass{article}\\begin{document}x\\end{document}";
        assert_eq!(wrap_document(src), src);
    }

    #[test]
    fn first_error_line_is_reported() {
        let log = "This is pdfTeX\n(./job.tex\n! Undefined control sequence.\nl.5 $\\displaystyle \\bad\n! Emergency stop.\n";
        assert_eq!(
            first_latex_error(log),
            Some("Undefined control sequence.".to_string())
        );
        assert_eq!(first_latex_error("no errors here\n"), None);
    }

    #[test]
    fn long_error_is_truncated() {
        let log = format!("! {}\n", "x".repeat(500));
        let msg = first_latex_error(&log).unwrap();
        assert_eq!(msg.chars().count(), MAX_ERROR_CHARS + 1);
    }

    #[test]
    fn file_primitives_are_rejected() {
        assert!(matches!(
            check_source("\\input{/etc/passwd}"),
            Err(RenderError::Content(_))
        ));
        assert!(check_source("\\frac{a}{b}").is_ok());
    }

    #[test]
    fn build_dir_sits_next_to_destination() {
        assert_eq!(
            build_dir_for(Path::new("/tmp/r/20260101-000000-0000-abcd.png")),
            PathBuf::from("/tmp/r/20260101-000000-0000-abcd.build")
        );
    }

    #[test]
    fn error_line_number_is_parsed() {
        let log = "! Undefined control sequence.\n<recently read> \\bad\n\nl.5 $\\displaystyle \\bad\n";
        assert_eq!(
            parse_log_error(log),
            Some(LogError {
                message: "Undefined control sequence.",
                line: Some(5)
            })
        );
        let log = "! Emergency stop.\n*** (job aborted, no legal \\end found)\n";
        assert_eq!(parse_log_error(log).unwrap().line, None);
    }

    #[test]
    fn missing_preamble_package_is_system_error() {
        let log = "! LaTeX Error: File `amsmath.sty' not found.\n\nType X to quit\n";
        assert!(matches!(
            classify_failure(log, false),
            Some(RenderError::System(_))
        ));
        // A package the user asked for is their problem.
        let log = "! LaTeX Error: File `tikz-cd-extra.sty' not found.\n\nl.1 \\usepackage{tikz-cd-extra}\n";
        assert!(matches!(
            classify_failure(log, false),
            Some(RenderError::Content(_))
        ));
    }

    #[test]
    fn error_inside_preamble_is_system_error() {
        let log = "! Undefined control sequence.\nl.2 \\usepackage\n";
        assert!(matches!(
            classify_failure(log, true),
            Some(RenderError::System(_))
        ));
        // Line 2 of a verbatim document is the user's own preamble.
        assert!(matches!(
            classify_failure(log, false),
            Some(RenderError::Content(_))
        ));
        let log = "! Missing $ inserted.\nl.5 $\\displaystyle \\frac{a}$\n";
        assert!(matches!(
            classify_failure(log, true),
            Some(RenderError::Content(m)) if m == "Missing $ inserted."
        ));
        assert!(classify_failure("no errors here\n", true).is_none());
    }

    #[test]
    fn file_primitive_spellings_rely_on_kpathsea() {
        // These slip past the text check; paranoid file access stops them in latex.
        assert!(check_source("^^5cinput{/etc/passwd}").is_ok());
        assert!(check_source("\\csname input\\endcsname{/etc/passwd}").is_ok());
        assert!(LATEX_ENV.contains(&("openin_any", "p")));
        assert!(LATEX_ENV.contains(&("openout_any", "p")));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("fake-latex");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_tex_installation_is_system_error() {
        let dir = std::env::temp_dir().join(format!("texbot-render-{}", uuid::Uuid::new_v4()));
        let latex = script(
            &dir,
            "cat > job.log <<'LOG'\n! LaTeX Error: File `standalone.cls' not found.\n\nType X to quit or <RETURN> to proceed,\nLOG\nexit 1",
        );
        let renderer = LatexRenderer::new(latex, "dvipng", 300, "White");
        let err = renderer
            .render("E=mc^2", &dir.join("out.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::System(_)), "{:?}", err);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn error_in_user_source_is_content_error() {
        let dir = std::env::temp_dir().join(format!("texbot-render-{}", uuid::Uuid::new_v4()));
        let latex = script(
            &dir,
            "cat > job.log <<'LOG'\n! Undefined control sequence.\nl.5 $\\displaystyle \\bad\nLOG\nexit 1",
        );
        let renderer = LatexRenderer::new(latex, "dvipng", 300, "White");
        let err = renderer
            .render("\\bad", &dir.join("out.png"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, RenderError::Content(m) if m == "Undefined control sequence."),
            "{:?}",
            err
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn latex_runs_with_paranoid_file_access() {
        let dir = std::env::temp_dir().join(format!("texbot-render-{}", uuid::Uuid::new_v4()));
        let latex = script(
            &dir,
            "echo \"! openin=$openin_any openout=$openout_any\" > job.log\nexit 1",
        );
        let renderer = LatexRenderer::new(latex, "dvipng", 300, "White");
        let err = renderer
            .render("x", &dir.join("out.png"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, RenderError::Content(m) if m == "openin=p openout=p"),
            "{:?}",
            err
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_latex_binary_is_system_error() {
        let dir = std::env::temp_dir().join(format!("texbot-render-{}", uuid::Uuid::new_v4()));
        let dest = dir.join("out.png");
        let renderer = LatexRenderer::new("texbot-no-such-latex", "dvipng", 300, "White");
        let err = renderer.render("x^2", &dest).await.unwrap_err();
        assert!(matches!(err, RenderError::System(_)));
        assert!(!build_dir_for(&dest).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
