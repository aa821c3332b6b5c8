//! Output path routing.
//!
//! Every object lands in `<dump-root>/<subdir>/<name>.sql`, with the subdirectory
//! chosen by kind. Routines are split between `functions/` and `procedures/`
//! either by a name prefix (the default, a naming convention rather than a catalog
//! fact) or by the kind the catalog reports.
//!
//! Quoted identifiers may contain `/`, `\\` or `..`, so names are percent-encoded
//! into a single file name component before they touch the filesystem.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::catalog::{CatalogObject, ObjectKind};
use crate::config::RoutineClassification;

pub const TABLES_DIR: &str = "tables";
pub const FUNCTIONS_DIR: &str = "functions";
pub const PROCEDURES_DIR: &str = "procedures";

/// One object bound to the file it will be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTask {
    pub object: CatalogObject,
    pub destination: PathBuf,
}

/// Maps catalog objects to destination paths. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct ObjectRouter {
    dump_root: PathBuf,
    procedure_prefix: String,
    classification: RoutineClassification,
}

impl ObjectRouter {
    pub fn new(
        dump_root: impl Into<PathBuf>,
        procedure_prefix: impl Into<String>,
        classification: RoutineClassification,
    ) -> Self {
        Self {
            dump_root: dump_root.into(),
            procedure_prefix: procedure_prefix.into(),
            classification,
        }
    }

    pub fn dump_root(&self) -> &Path {
        &self.dump_root
    }

    /// Subdirectory name for an object.
    pub fn subdir(&self, object: &CatalogObject) -> &'static str {
        match object.kind {
            ObjectKind::Table => TABLES_DIR,
            kind => {
                let is_procedure = match self.classification {
                    RoutineClassification::NamePrefix => {
                        object.name.starts_with(&self.procedure_prefix)
                    }
                    RoutineClassification::CatalogKind => kind == ObjectKind::Procedure,
                };
                if is_procedure {
                    PROCEDURES_DIR
                } else {
                    FUNCTIONS_DIR
                }
            }
        }
    }

    /// Destination file for an object, always directly inside its subdirectory.
    pub fn route(&self, object: &CatalogObject) -> PathBuf {
        self.dump_root
            .join(self.subdir(object))
            .join(file_name(&object.name))
    }

    /// Build one task per table.
    pub fn plan_tables(&self, tables: Vec<String>) -> Vec<ExportTask> {
        tables
            .into_iter()
            .map(|name| self.task(CatalogObject::table(name)))
            .collect()
    }

    /// Build one task per destination for routines.
    ///
    /// Overloads share a name and therefore a path; their definitions are joined
    /// into a single task so that no two workers write the same file.
    pub fn plan_routines(&self, routines: Vec<CatalogObject>) -> Vec<ExportTask> {
        let mut by_path: BTreeMap<PathBuf, ExportTask> = BTreeMap::new();

        for routine in routines {
            let destination = self.route(&routine);
            match by_path.get_mut(&destination) {
                Some(existing) => {
                    warn!(
                        name = %routine.name,
                        "Routine is overloaded, writing all definitions to one file"
                    );
                    let merged = existing.object.definition.get_or_insert_with(String::new);
                    if let Some(def) = routine.definition {
                        merged.push_str("\n\n");
                        merged.push_str(&def);
                    }
                }
                None => {
                    by_path.insert(
                        destination.clone(),
                        ExportTask {
                            object: routine,
                            destination,
                        },
                    );
                }
            }
        }

        by_path.into_values().collect()
    }

    fn task(&self, object: CatalogObject) -> ExportTask {
        ExportTask {
            destination: self.route(&object),
            object,
        }
    }
}

/// Bytes escaped in file names. `%` is included so that distinct names
/// never encode to the same file.
const FILE_NAME_ESCAPES: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b'%');

/// `<name>.sql` as one path component. With separators escaped and the `.sql`
/// suffix appended, the result can never be `.` or `..`.
fn file_name(name: &str) -> String {
    format!("{}.sql", utf8_percent_encode(name, FILE_NAME_ESCAPES))
}
