//! Controller configuration.
//!
//! Configuration is constructed programmatically by the embedding
//! process (file parsing lives outside the core) and validated
//! eagerly: URL templates and change-set filters compile at build
//! time, so a bad pattern is a startup failure instead of a mid-tick
//! one.

use std::collections::HashMap;

use regex::Regex;

use gantry_core::JobRecord;

/// Errors raised while building a [`Config`].
///
/// All of these are fatal: the controller refuses to tick with a
/// half-valid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The job URL template references an unknown placeholder.
    #[error("bad job URL template: unknown placeholder {{{placeholder}}}")]
    BadUrlTemplate {
        /// The unrecognized placeholder name.
        placeholder: String,
    },

    /// The job URL template has an unterminated `{` placeholder.
    #[error("bad job URL template: unterminated placeholder")]
    UnterminatedPlaceholder,

    /// No job URL template was provided.
    #[error("missing job URL template")]
    MissingUrlTemplate,

    /// A `run_if_changed` pattern failed to compile.
    #[error("bad change filter for {presubmit}: {source}")]
    BadChangeFilter {
        /// The presubmit carrying the bad pattern.
        presubmit: String,
        /// The regex compile failure.
        #[source]
        source: regex::Error,
    },
}

/// A field of the job record a URL template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateField {
    /// Record name.
    Name,
    /// Job identity.
    Job,
    /// Current state, rendered lowercase.
    State,
    /// Job type, rendered snake_case.
    JobType,
    /// Allocated build ID (empty until allocation).
    BuildId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Field(TemplateField),
}

/// A compiled job URL template.
///
/// Templates are plain strings with `{placeholder}` substitutions over
/// the job record: `{name}`, `{job}`, `{state}`, `{type}`,
/// `{build_id}`. Compilation rejects unknown placeholders, so
/// rendering is infallible.
///
/// ## Example
///
/// ```rust
/// use gantry_controller::config::UrlTemplate;
///
/// let template = UrlTemplate::parse("https://ci.example.com/{name}/{state}").unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    segments: Vec<TemplateSegment>,
}

impl UrlTemplate {
    /// Compiles a template string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadUrlTemplate`] for unknown
    /// placeholders and [`ConfigError::UnterminatedPlaceholder`] for a
    /// dangling `{`.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            rest = &rest[open + 1..];
            let Some(close) = rest.find('}') else {
                return Err(ConfigError::UnterminatedPlaceholder);
            };
            let placeholder = &rest[..close];
            rest = &rest[close + 1..];

            let field = match placeholder {
                "name" => TemplateField::Name,
                "job" => TemplateField::Job,
                "state" => TemplateField::State,
                "type" => TemplateField::JobType,
                "build_id" => TemplateField::BuildId,
                other => {
                    return Err(ConfigError::BadUrlTemplate {
                        placeholder: other.to_string(),
                    });
                }
            };
            if !literal.is_empty() {
                segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(TemplateSegment::Field(field));
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(TemplateSegment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Renders the template against a job record.
    #[must_use]
    pub fn render(&self, record: &JobRecord) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(s) => out.push_str(s),
                TemplateSegment::Field(TemplateField::Name) => out.push_str(&record.name),
                TemplateSegment::Field(TemplateField::Job) => out.push_str(&record.spec.job),
                TemplateSegment::Field(TemplateField::State) => {
                    out.push_str(&record.status.state.to_string());
                }
                TemplateSegment::Field(TemplateField::JobType) => {
                    let job_type = match record.spec.job_type {
                        gantry_core::JobType::Periodic => "periodic",
                        gantry_core::JobType::Presubmit => "presubmit",
                        gantry_core::JobType::Postsubmit => "postsubmit",
                        gantry_core::JobType::Batch => "batch",
                    };
                    out.push_str(job_type);
                }
                TemplateSegment::Field(TemplateField::BuildId) => {
                    out.push_str(record.status.build_id.as_deref().unwrap_or_default());
                }
            }
        }
        out
    }
}

/// A presubmit catalog entry.
///
/// The reconciler consults the catalog for exactly one purpose:
/// resolving the change-set filter of a follow-on job.
#[derive(Debug, Clone)]
pub struct Presubmit {
    /// Job identity this entry configures.
    pub name: String,
    /// Only run when some changed file matches, if set.
    pub run_if_changed: Option<Regex>,
    /// Entries that run after this one succeeds.
    pub run_after_success: Vec<Presubmit>,
}

impl Presubmit {
    /// Creates an unconditional entry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_if_changed: None,
            run_after_success: Vec::new(),
        }
    }

    /// Sets the change-set filter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadChangeFilter`] if the pattern does
    /// not compile.
    pub fn with_run_if_changed(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::BadChangeFilter {
            presubmit: self.name.clone(),
            source,
        })?;
        self.run_if_changed = Some(regex);
        Ok(self)
    }

    /// Adds follow-on entries.
    #[must_use]
    pub fn with_run_after_success(mut self, children: Vec<Presubmit>) -> Self {
        self.run_after_success = children;
        self
    }

    /// Returns true if this entry should run against the given changed
    /// files.
    ///
    /// An entry without a filter runs against anything; an entry with
    /// one runs iff at least one filename matches.
    #[must_use]
    pub fn runs_against_changes<S: AsRef<str>>(&self, filenames: &[S]) -> bool {
        match &self.run_if_changed {
            None => true,
            Some(regex) => filenames.iter().any(|f| regex.is_match(f.as_ref())),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Template rendered into `status.url` on every visible transition.
    pub job_url_template: UrlTemplate,
    /// Global cap on pending pods; zero means unlimited.
    pub max_concurrency: usize,
    /// Presubmit catalog keyed by `org/repo` slug.
    pub presubmits: HashMap<String, Vec<Presubmit>>,
}

impl Config {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Finds a presubmit entry by job identity, searching follow-on
    /// children as well as top-level entries.
    #[must_use]
    pub fn find_presubmit(&self, slug: &str, job: &str) -> Option<&Presubmit> {
        fn search<'a>(entries: &'a [Presubmit], job: &str) -> Option<&'a Presubmit> {
            for entry in entries {
                if entry.name == job {
                    return Some(entry);
                }
                if let Some(found) = search(&entry.run_after_success, job) {
                    return Some(found);
                }
            }
            None
        }
        search(self.presubmits.get(slug)?, job)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    job_url_template: Option<UrlTemplate>,
    max_concurrency: usize,
    presubmits: HashMap<String, Vec<Presubmit>>,
}

impl ConfigBuilder {
    /// Sets the job URL template, compiling it eagerly.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the template does not compile.
    pub fn job_url_template(mut self, template: &str) -> Result<Self, ConfigError> {
        self.job_url_template = Some(UrlTemplate::parse(template)?);
        Ok(self)
    }

    /// Sets the global pending-pod cap (zero = unlimited).
    #[must_use]
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Registers the presubmit catalog for a repository slug.
    #[must_use]
    pub fn presubmits(mut self, slug: impl Into<String>, entries: Vec<Presubmit>) -> Self {
        self.presubmits.insert(slug.into(), entries);
        self
    }

    /// Finalizes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingUrlTemplate`] if no template was
    /// provided.
    pub fn build(self) -> Result<Config, ConfigError> {
        Ok(Config {
            job_url_template: self
                .job_url_template
                .ok_or(ConfigError::MissingUrlTemplate)?,
            max_concurrency: self.max_concurrency,
            presubmits: self.presubmits,
        })
    }
}
