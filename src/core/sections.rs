use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use tracing::{info, warn};

use super::llm::LanguageModel;
use super::types::{Message, ProjectContext};
use crate::error::Result;

/// One documentation file and the subsections it is assembled from
#[derive(Debug, Clone, Copy)]
pub struct SectionSpec {
    /// File stem, e.g. `architecture` -> `architecture.md`
    pub key: &'static str,
    pub title: &'static str,
    pub subsections: &'static [&'static str],
}

pub const SECTIONS: [SectionSpec; 7] = [
    SectionSpec {
        key: "navigation",
        title: "Project Navigation",
        subsections: &["Overview", "Directory Structure", "Quick Links"],
    },
    SectionSpec {
        key: "infrastructure",
        title: "Infrastructure Overview",
        subsections: &["Cloud Provider", "Deployment Model", "Database", "Architecture Diagram", "Service Dependencies"],
    },
    SectionSpec {
        key: "architecture",
        title: "System Architecture",
        subsections: &["Components", "Data Flow", "Integrations", "Scalability", "Security"],
    },
    SectionSpec {
        key: "api",
        title: "API Documentation",
        subsections: &["Endpoints", "Authentication", "Error Handling", "Examples", "Schemas"],
    },
    SectionSpec {
        key: "security",
        title: "Security Documentation",
        subsections: &["Authentication", "Authorization", "Data Protection", "Compliance", "Best Practices"],
    },
    SectionSpec {
        key: "operations",
        title: "Operations Guide",
        subsections: &["Deployment", "Monitoring", "Scaling", "Backup", "Disaster Recovery"],
    },
    SectionSpec {
        key: "cost",
        title: "Cost Analysis",
        subsections: &["Components", "Scaling Factors", "Optimization", "Breakdown"],
    },
];

const SUBSECTION_TEMPLATE_NAME: &str = "subsection";

const SUBSECTION_TEMPLATE: &str = r#"You are a technical documentation expert. Write detailed markdown documentation for the {{ subsection }} subsection of the {{ section }} section.
Cover ONLY {{ subsection }}; other aspects have their own subsections.
Base the documentation on this project context:

{{ context_json }}

Requirements:
1. Proper markdown: headers, lists and code blocks
2. Mermaid diagrams where they help
3. Cross-references to related sections
4. Detailed explanations, best practices and examples

Respond with the markdown content for this subsection only."#;

/// Writes one markdown file per catalogue section under `docs/`
pub struct SectionGenerator<'a> {
    model: &'a dyn LanguageModel,
    context: ProjectContext,
    docs_dir: PathBuf,
    templates: Tera,
    markdown_block_regex: Regex,
    fence_marker_regex: Regex,
    blank_lines_regex: Regex,
}

impl<'a> SectionGenerator<'a> {
    pub fn new(project_dir: &Path, context: ProjectContext, model: &'a dyn LanguageModel) -> Result<Self> {
        let mut templates = Tera::default();
        templates.autoescape_on(vec![]);
        templates.add_raw_template(SUBSECTION_TEMPLATE_NAME, SUBSECTION_TEMPLATE)?;

        Ok(Self {
            model,
            context,
            docs_dir: project_dir.join("docs"),
            templates,
            markdown_block_regex: Regex::new(r"```markdown\n([\s\S]*?)```").expect("Invalid markdown block regex"),
            fence_marker_regex: Regex::new(r"```\w*\n?").expect("Invalid fence marker regex"),
            blank_lines_regex: Regex::new(r"\n[ \t]*(\n[ \t]*)+\n").expect("Invalid blank lines regex"),
        })
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    /// Generate every section; returns the written file paths
    pub async fn generate(&self) -> Result<Vec<PathBuf>> {
        info!("📝 Generating documentation into {}", self.docs_dir.display());
        std::fs::create_dir_all(&self.docs_dir)?;

        let mut written = Vec::with_capacity(SECTIONS.len());
        for (i, section) in SECTIONS.iter().enumerate() {
            info!("[{}/{}] Generating {}.md", i + 1, SECTIONS.len(), section.key);
            let content = self.generate_section(section).await;

            let path = self.docs_dir.join(format!("{}.md", section.key));
            std::fs::write(&path, content)?;
            written.push(path);
        }

        info!("✅ Documentation generated in {}", self.docs_dir.display());
        Ok(written)
    }

    /// Assemble one section; failed subsections become placeholders
    pub async fn generate_section(&self, section: &SectionSpec) -> String {
        let mut content = format!("# {}\n\n", section.title);

        for subsection in section.subsections {
            match self.generate_subsection(section, subsection).await {
                Ok(markdown) => {
                    content.push_str(&markdown);
                    content.push_str("\n\n");
                }
                Err(e) => {
                    warn!("Failed to generate {}/{}: {}", section.key, subsection, e);
                    content.push_str(&placeholder(subsection));
                }
            }
        }

        content
    }

    async fn generate_subsection(&self, section: &SectionSpec, subsection: &str) -> Result<String> {
        let prompt = self.render_prompt(section, subsection)?;
        let completion = self.model.complete_raw(&[Message::system(prompt)]).await?;
        Ok(self.extract_markdown(&completion))
    }

    fn render_prompt(&self, section: &SectionSpec, subsection: &str) -> Result<String> {
        let slug = subsection.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
        let prompt_context = json!({
            "section": section.key,
            "subsection": subsection,
            "infrastructure": self.context.infrastructure,
            "requirements": { slug: true },
        });

        let mut context = Context::new();
        context.insert("section", section.key);
        context.insert("subsection", subsection);
        context.insert("context_json", &serde_json::to_string_pretty(&prompt_context)?);

        Ok(self.templates.render(SUBSECTION_TEMPLATE_NAME, &context)?)
    }

    /// Prefer a ```markdown block, else strip fence markers and tidy blank lines
    pub fn extract_markdown(&self, response: &str) -> String {
        if let Some(inner) = self.markdown_block_regex.captures(response).and_then(|caps| caps.get(1)) {
            return inner.as_str().trim().to_string();
        }

        let unfenced = self.fence_marker_regex.replace_all(response, "");
        self.blank_lines_regex.replace_all(&unfenced, "\n\n").trim().to_string()
    }
}

fn placeholder(subsection: &str) -> String {
    format!("## {}\n\nContent generation failed for this section.\n\n", subsection)
}
