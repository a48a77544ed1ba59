//! Shared schema bootstrap
//!
//! Every statement is `IF NOT EXISTS`, so the script can run on each connect
//! from every application sharing the service.

/// A core entity table and the columns full-text search reads from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTable {
    pub table: &'static str,
    pub title_field: &'static str,
    pub body_field: &'static str,
}

pub const SEARCH_TABLES: &[SearchTable] = &[
    SearchTable {
        table: "quest",
        title_field: "title",
        body_field: "description",
    },
    SearchTable {
        table: "note",
        title_field: "title",
        body_field: "content",
    },
    SearchTable {
        table: "item",
        title_field: "name",
        body_field: "description",
    },
    SearchTable {
        table: "initiative",
        title_field: "name",
        body_field: "description",
    },
    SearchTable {
        table: "routine",
        title_field: "name",
        body_field: "description",
    },
];

pub const ANALYZER: &str = "altair_text";

const LINK_SCHEMA: &str = "
DEFINE TABLE IF NOT EXISTS link SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS source ON TABLE link TYPE string;
DEFINE FIELD IF NOT EXISTS target ON TABLE link TYPE string;
DEFINE FIELD IF NOT EXISTS link_type ON TABLE link TYPE string;
DEFINE FIELD IF NOT EXISTS metadata ON TABLE link FLEXIBLE TYPE option<object>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE link TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS created_by ON TABLE link TYPE option<string>;
DEFINE INDEX IF NOT EXISTS link_source ON TABLE link FIELDS source;
DEFINE INDEX IF NOT EXISTS link_target ON TABLE link FIELDS target;
DEFINE INDEX IF NOT EXISTS link_type_idx ON TABLE link FIELDS link_type;
DEFINE INDEX IF NOT EXISTS link_unique ON TABLE link FIELDS source, target, link_type UNIQUE;
";

/// The full bootstrap script: analyzer, core tables with search indexes, `link`.
pub fn bootstrap_script() -> String {
    let mut script = format!(
        "DEFINE ANALYZER IF NOT EXISTS {ANALYZER} TOKENIZERS blank,class FILTERS lowercase,ascii;\n"
    );

    for t in SEARCH_TABLES {
        let table = t.table;
        script.push_str(&format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;\n\
             DEFINE FIELD IF NOT EXISTS created_at ON TABLE {table} TYPE datetime DEFAULT time::now();\n\
             DEFINE FIELD IF NOT EXISTS updated_at ON TABLE {table} TYPE datetime VALUE time::now();\n"
        ));
        for field in [t.title_field, t.body_field] {
            script.push_str(&format!(
                "DEFINE INDEX IF NOT EXISTS {table}_{field}_search ON TABLE {table} \
                 FIELDS {field} SEARCH ANALYZER {ANALYZER} BM25;\n"
            ));
        }
    }

    script.push_str(LINK_SCHEMA);
    script
}
