use std::ops::Range;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer, Word};

use crate::error::UpgradeError;

/// Drops each named key from `table` if it exists. Missing keys (and a
/// missing table) are skipped. With `is_foreign_key` the names refer to
/// `CONSTRAINT <name> FOREIGN KEY` clauses. Otherwise they refer to unique
/// keys, declared either as a named index or as a `CONSTRAINT <name> UNIQUE`
/// clause.
pub fn drop_keys_if_exist(
    conn: &Connection,
    table: &str,
    keys: &[&str],
    is_foreign_key: bool,
) -> Result<(), UpgradeError> {
    for key in keys {
        let dropped = if is_foreign_key {
            drop_table_constraint_if_exists(conn, table, key, ConstraintKind::ForeignKey)?
        } else {
            drop_index_if_exists(conn, table, key)?
                || drop_table_constraint_if_exists(conn, table, key, ConstraintKind::Unique)?
        };

        if dropped {
            info!("Dropped key {} from table {}", key, table);
        } else {
            debug!("Key {} does not exist on table {}, nothing to drop", key, table);
        }
    }

    Ok(())
}

fn drop_index_if_exists(conn: &Connection, table: &str, key: &str) -> Result<bool, UpgradeError> {
    let index_name: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master
             WHERE type = 'index'
               AND tbl_name = ?1 COLLATE NOCASE
               AND name = ?2 COLLATE NOCASE
               AND sql IS NOT NULL",
            params![table, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(UpgradeError::sql(format!(
            "Error while checking for key {key} on table {table}"
        )))?;

    let Some(index_name) = index_name else {
        return Ok(false);
    };

    conn.execute(&format!("DROP INDEX {}", quote_identifier(&index_name)), [])
        .map_err(UpgradeError::sql(format!(
            "Error while dropping key {key} from table {table}"
        )))?;

    Ok(true)
}

/// SQLite cannot drop a table constraint in place, so the table is rebuilt
/// from its stored definition minus the named clause.
fn drop_table_constraint_if_exists(
    conn: &Connection,
    table: &str,
    key: &str,
    kind: ConstraintKind,
) -> Result<bool, UpgradeError> {
    let stored: Option<(String, String)> = conn
        .query_row(
            "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(UpgradeError::sql(format!(
            "Error while checking for key {key} on table {table}"
        )))?;

    let Some((table_name, create_sql)) = stored else {
        return Ok(false);
    };

    let definition =
        TableDefinition::parse(&create_sql).map_err(|reason| UpgradeError::KeyDrop {
            table: table.to_owned(),
            key: key.to_owned(),
            reason: format!("unable to parse the stored table definition: {reason}"),
        })?;

    let Some(rebuilt_body) = definition.body_without(key, kind) else {
        return Ok(false);
    };

    let legacy_alter: bool = conn
        .pragma_query_value(None, "legacy_alter_table", |row| row.get(0))
        .map_err(UpgradeError::sql("Error while reading legacy_alter_table"))?;

    // Renaming the copy back must not try to re-resolve views or triggers that
    // name the original table while it is absent
    conn.pragma_update(None, "legacy_alter_table", true)
        .map_err(UpgradeError::sql("Error while enabling legacy_alter_table"))?;

    let rebuilt = rebuild_table(conn, &table_name, &rebuilt_body, definition.trailer())
        .map_err(UpgradeError::sql(format!(
            "Error while dropping {kind} {key} from table {table}"
        )));

    let restored = conn
        .pragma_update(None, "legacy_alter_table", legacy_alter)
        .map_err(UpgradeError::sql("Error while restoring legacy_alter_table"));

    rebuilt?;
    restored?;

    Ok(true)
}

/// Recreates `table` with a new column/constraint body, keeping every row,
/// index, trigger and the AUTOINCREMENT high-water mark.
fn rebuild_table(
    conn: &Connection,
    table: &str,
    body: &str,
    trailer: &str,
) -> rusqlite::Result<()> {
    let companions: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL",
        )?;
        let rows = stmt.query_map([table], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let sequence = autoincrement_sequence(conn, table)?;

    let original = quote_identifier(table);
    let scratch = quote_identifier(&format!("{table}__rebuild"));

    conn.execute(&format!("CREATE TABLE {scratch} ({body}){trailer}"), [])?;
    conn.execute(&format!("INSERT INTO {scratch} SELECT * FROM {original}"), [])?;
    conn.execute(&format!("DROP TABLE {original}"), [])?;
    conn.execute(&format!("ALTER TABLE {scratch} RENAME TO {original}"), [])?;

    for sql in &companions {
        conn.execute_batch(sql)?;
    }

    if let Some(seq) = sequence {
        let updated = conn.execute(
            "UPDATE sqlite_sequence SET seq = MAX(seq, ?1) WHERE name = ?2",
            params![seq, table],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                params![table, seq],
            )?;
        }
    }

    Ok(())
}

fn autoincrement_sequence(conn: &Connection, table: &str) -> rusqlite::Result<Option<i64>> {
    let has_sequence_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
        [],
        |row| row.get(0),
    )?;

    if !has_sequence_table {
        return Ok(None);
    }

    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = ?1",
        [table],
        |row| row.get(0),
    )
    .optional()
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    ForeignKey,
    Unique,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::ForeignKey => write!(f, "foreign key"),
            ConstraintKind::Unique => write!(f, "unique key"),
        }
    }
}

/// One top-level entry of the column list: a column definition or a table
/// constraint.
#[derive(Debug)]
struct Element {
    span: Range<usize>,
    constraint: Option<(String, ConstraintKind)>,
}

impl Element {
    fn is_named(&self, key: &str, kind: ConstraintKind) -> bool {
        matches!(&self.constraint, Some((name, k)) if *k == kind && name.eq_ignore_ascii_case(key))
    }
}

/// A stored `CREATE TABLE` statement split into its top-level elements.
#[derive(Debug)]
struct TableDefinition<'a> {
    sql: &'a str,
    body: Range<usize>,
    elements: Vec<Element>,
}

impl<'a> TableDefinition<'a> {
    fn parse(sql: &'a str) -> Result<Self, String> {
        let dialect = SQLiteDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize_with_location()
            .map_err(|e| e.to_string())?;
        let lines = line_starts(sql);

        let mut depth = 0usize;
        let mut body_start = None;
        let mut element_start = 0;
        let mut leading: Vec<&Token> = Vec::new();
        let mut elements = Vec::new();

        for TokenWithSpan { token, span } in &tokens {
            match token {
                Token::LParen if depth == 0 => {
                    let offset = byte_offset(sql, &lines, span.start)? + 1;
                    body_start = Some(offset);
                    element_start = offset;
                    depth = 1;
                    continue;
                }
                Token::LParen => depth += 1,
                Token::Comma if depth == 1 => {
                    let offset = byte_offset(sql, &lines, span.start)?;
                    elements.push(Element {
                        span: element_start..offset,
                        constraint: named_constraint(&leading),
                    });
                    leading.clear();
                    element_start = offset + 1;
                    continue;
                }
                Token::RParen if depth == 1 => {
                    let offset = byte_offset(sql, &lines, span.start)?;
                    elements.push(Element {
                        span: element_start..offset,
                        constraint: named_constraint(&leading),
                    });
                    let body = body_start.ok_or("column list has no opening parenthesis")?..offset;
                    return Ok(Self {
                        sql,
                        body,
                        elements,
                    });
                }
                Token::RParen => depth = depth.saturating_sub(1),
                _ => {}
            }

            if depth >= 1 && leading.len() < 4 && !matches!(token, Token::Whitespace(_)) {
                leading.push(token);
            }
        }

        Err("column list is not terminated".to_owned())
    }

    /// Whatever follows the closing parenthesis (`WITHOUT ROWID`, `STRICT`).
    fn trailer(&self) -> &'a str {
        &self.sql[self.body.end + 1..]
    }

    fn element_text(&self, element: &Element) -> &'a str {
        &self.sql[element.span.clone()]
    }

    /// The body with the named constraint clause removed, or `None` if the
    /// table has no such clause.
    fn body_without(&self, key: &str, kind: ConstraintKind) -> Option<String> {
        let position = self
            .elements
            .iter()
            .position(|element| element.is_named(key, kind))?;

        let kept: Vec<&str> = self
            .elements
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, element)| self.element_text(element))
            .collect();

        Some(kept.join(","))
    }
}

/// Recognizes `CONSTRAINT <name> FOREIGN KEY ...` and
/// `CONSTRAINT <name> UNIQUE ...` from an element's first tokens.
fn named_constraint(leading: &[&Token]) -> Option<(String, ConstraintKind)> {
    match leading {
        [Token::Word(constraint), Token::Word(name), Token::Word(first), rest @ ..]
            if is_keyword(constraint, Keyword::CONSTRAINT) =>
        {
            let kind = if is_keyword(first, Keyword::UNIQUE) {
                ConstraintKind::Unique
            } else if is_keyword(first, Keyword::FOREIGN)
                && matches!(rest, [Token::Word(second), ..] if is_keyword(second, Keyword::KEY))
            {
                ConstraintKind::ForeignKey
            } else {
                return None;
            };
            Some((name.value.clone(), kind))
        }
        _ => None,
    }
}

fn is_keyword(word: &Word, keyword: Keyword) -> bool {
    word.quote_style.is_none() && word.keyword == keyword
}

fn line_starts(sql: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Converts a tokenizer location (1-based line and character column) into a
/// byte offset into `sql`.
fn byte_offset(sql: &str, lines: &[usize], location: Location) -> Result<usize, String> {
    let line_start = usize::try_from(location.line)
        .ok()
        .and_then(|line| line.checked_sub(1))
        .and_then(|line| lines.get(line).copied());
    let column = usize::try_from(location.column)
        .ok()
        .and_then(|column| column.checked_sub(1));

    line_start
        .zip(column)
        .and_then(|(start, column)| {
            sql[start..]
                .char_indices()
                .nth(column)
                .map(|(offset, _)| start + offset)
        })
        .ok_or_else(|| format!("token location {location:?} is outside the statement"))
}
