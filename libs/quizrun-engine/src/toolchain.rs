//! Language toolchain adapter.
//!
//! A static table keyed by [`Language`] describing how each language's
//! source is named, compiled and run. Command templates are relative to the
//! job's workspace directory and use two placeholders:
//! `{source}` (source file name) and `{artifact}` (compiled output name).
//! Nothing here touches the filesystem or spawns processes.

use quizrun_common::types::{Language, UnsupportedLanguage};

/// A program and its argument vector, no shell involved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Program followed by args
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceNaming {
    /// `{id}.{ext}`, unique per job
    Extension(&'static str),
    /// Fixed name demanded by the language (Java's public class rule)
    Fixed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactNaming {
    /// `{id}.{ext}`
    Extension(&'static str),
    Fixed(&'static str),
}

#[derive(Debug)]
pub struct Toolchain {
    pub language: Language,
    pub source: SourceNaming,
    pub artifact: Option<ArtifactNaming>,
    pub compile: Option<&'static [&'static str]>,
    pub run: &'static [&'static str],
}

static TOOLCHAINS: [Toolchain; 4] = [
    Toolchain {
        language: Language::Python,
        source: SourceNaming::Extension("py"),
        artifact: None,
        compile: None,
        run: &["python3", "{source}"],
    },
    Toolchain {
        language: Language::Javascript,
        source: SourceNaming::Extension("js"),
        artifact: None,
        compile: None,
        run: &["node", "{source}"],
    },
    Toolchain {
        language: Language::Cpp,
        source: SourceNaming::Extension("cpp"),
        artifact: Some(ArtifactNaming::Extension("out")),
        compile: Some(&["g++", "-O2", "-o", "{artifact}", "{source}"]),
        run: &["./{artifact}"],
    },
    Toolchain {
        language: Language::Java,
        source: SourceNaming::Fixed("Main.java"),
        artifact: Some(ArtifactNaming::Fixed("Main.class")),
        compile: Some(&["javac", "{source}"]),
        run: &["java", "-cp", ".", "Main"],
    },
];

/// Resolve a raw language name. Pure lookup, safe to call before any I/O.
pub fn resolve(language: &str) -> Result<&'static Toolchain, UnsupportedLanguage> {
    let language: Language = language.parse()?;
    Ok(Toolchain::for_language(language))
}

impl Toolchain {
    pub fn for_language(language: Language) -> &'static Toolchain {
        match language {
            Language::Python => &TOOLCHAINS[0],
            Language::Javascript => &TOOLCHAINS[1],
            Language::Cpp => &TOOLCHAINS[2],
            Language::Java => &TOOLCHAINS[3],
        }
    }

    pub fn all() -> &'static [Toolchain] {
        &TOOLCHAINS
    }

    pub fn source_file_name(&self, id: &str) -> String {
        match self.source {
            SourceNaming::Extension(ext) => format!("{}.{}", id, ext),
            SourceNaming::Fixed(name) => name.to_string(),
        }
    }

    pub fn artifact_file_name(&self, id: &str) -> Option<String> {
        self.artifact.map(|naming| match naming {
            ArtifactNaming::Extension(ext) => format!("{}.{}", id, ext),
            ArtifactNaming::Fixed(name) => name.to_string(),
        })
    }

    pub fn compile_command(&self, id: &str) -> Option<CommandSpec> {
        self.compile.map(|template| self.render(template, id))
    }

    pub fn run_command(&self, id: &str) -> CommandSpec {
        self.render(self.run, id)
    }

    fn render(&self, template: &[&str], id: &str) -> CommandSpec {
        let source = self.source_file_name(id);
        let artifact = self.artifact_file_name(id).unwrap_or_default();
        let mut parts = template.iter().map(|part| {
            part.replace("{source}", &source)
                .replace("{artifact}", &artifact)
        });
        // Templates are static and never empty
        let program = parts.next().unwrap_or_default();
        CommandSpec::new(program).with_args(parts)
    }
}
