//! collection of hcl configuration documents ([Body] and path to source file)
//!
//! [HclDocuments] tracks
//! - the source path
//! - the root blocks (`filter`, `variable`, `target`, ...)
//! - the root attributes (never valid, kept for error reporting)
//!
//! and defines a numeric index for each. Once added those indices are stable (removal is not possible)
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use std::path::{Path, PathBuf};

/// Files picked up by [HclDocuments::load_directory]
pub const FILE_SUFFIX: &str = "cpm.hcl";

#[derive(Default, Debug)]
pub struct HclDocuments {
    sources: Vec<Source>,
    root_attributes: Vec<(usize, Attribute)>,
    root_blocks: Vec<(usize, Block)>,
}

impl HclDocuments {
    /// Inserts and indexes an hcl document
    pub fn insert(&mut self, document: Body, path: impl Into<Option<PathBuf>>) {
        let source_index = self.sources.len();
        self.sources.push(path.into());

        for structure in document.into_iter() {
            match structure {
                Structure::Block(block) => self.root_blocks.push((source_index, block)),
                Structure::Attribute(attribute) => {
                    self.root_attributes.push((source_index, attribute))
                }
            }
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = SourceAttribute> {
        self.root_attributes
            .iter()
            .enumerate()
            .map(|(index, (source_index, attribute))| {
                (index, &self.sources[*source_index], attribute)
            })
    }

    pub fn get_block(&self, index: usize) -> SourceBlock {
        let (source_index, block) = &self.root_blocks[index];
        (index, &self.sources[*source_index], block)
    }

    pub fn blocks(&self) -> impl Iterator<Item = SourceBlock> {
        self.root_blocks
            .iter()
            .enumerate()
            .map(|(index, (source_index, block))| (index, &self.sources[*source_index], block))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl HclDocuments {
    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path
            .canonicalize()
            .map_err(|source| LoadError::io(file_path, source))?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)
            .map_err(|source| LoadError::io(&file_path, source))?;
        let body = hcl_edit::parser::parse_body(&file_contents).map_err(|source| {
            LoadError::HclParseFailed {
                path: file_path.clone(),
                source,
            }
        })?;

        self.insert(body, Some(file_path));
        Ok(())
    }

    /// Load every `*cpm.hcl` file of a directory, in file name order
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut file_paths = vec![];
        let read_dir =
            std::fs::read_dir(dir_path).map_err(|source| LoadError::io(dir_path, source))?;
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|source| LoadError::io(dir_path, source))?;
            let file_type = dir_entry
                .file_type()
                .map_err(|source| LoadError::io(&dir_entry.path(), source))?;
            if !file_type.is_file() {
                continue;
            }

            if dir_entry
                .file_name()
                .to_string_lossy()
                .ends_with(FILE_SUFFIX)
            {
                file_paths.push(dir_entry.path());
            }
        }

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound(dir_path.to_owned()));
        }

        file_paths.sort();
        for file_path in file_paths {
            self.load_file(&file_path)?;
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("no *cpm.hcl files found in {}", .0.display())]
    NoFilesFound(PathBuf),
    #[error("unable to read {}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse hcl file {}", .path.display())]
    HclParseFailed {
        path: PathBuf,
        source: hcl_edit::parser::Error,
    },
}

impl LoadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

impl From<Body> for HclDocuments {
    fn from(value: Body) -> Self {
        let mut documents = HclDocuments::default();
        documents.insert(value, None);
        documents
    }
}

/// Utility macro to create [HclDocuments]
///
/// Create from a single document
/// ```
/// # use cpm::hcl_documents;
/// hcl_documents!(r#"variable "region" { default = "eu-west-1" }"#);
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use cpm::hcl_documents;
/// hcl_documents! {
///   "filters.cpm.hcl" => r#"filter "all" { type = "selector" }"#,
///   "variables.cpm.hcl" => r#"variable "replicas" { default = 3 }"#
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use cpm::hcl_documents;
/// hcl_documents!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! hcl_documents {
    // single document without source
    { $expr:expr } => {
        $crate::hcl_documents::HclDocuments::from(hcl_edit::parser::parse_body($expr).expect("body must parse"))
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::hcl_documents::HclDocuments::default();
        $(
            docs.insert(hcl_edit::parser::parse_body($expr).expect("body must parse"), Some($source.into()));
        )+

        docs
    }};
}

pub type Source = Option<PathBuf>;
pub type SourceAttribute<'a> = (usize, &'a Source, &'a Attribute);
pub type SourceBlock<'a> = (usize, &'a Source, &'a Block);
