// Statement Parser
//
// Standard statements are parsed by sqlparser's GenericDialect. The mapping,
// job and snapshot DDL is recognised up front and parsed token by token on the
// same sqlparser Parser.

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithSpan};
use std::collections::BTreeMap;

use crate::api::middleware::{AppError, Position};
use crate::models::{AlterJobOperation, JobConfig, MappingField, MappingOptions, ScalarType};

/// A parsed statement before validation
#[derive(Debug, Clone)]
pub enum SqlStatement {
    CreateMapping {
        name: String,
        columns: Vec<MappingField>,
        connector_type: String,
        options: MappingOptions,
        replace: bool,
        if_not_exists: bool,
    },
    DropMapping {
        name: String,
        if_exists: bool,
    },
    CreateJob {
        name: String,
        job_config: JobConfig,
        if_not_exists: bool,
        insert: Box<Statement>,
    },
    AlterJob {
        name: String,
        operation: AlterJobOperation,
    },
    DropJob {
        name: String,
        if_exists: bool,
        with_snapshot: Option<String>,
    },
    CreateSnapshot {
        name: String,
        job_name: String,
    },
    DropSnapshot {
        name: String,
        if_exists: bool,
    },
    Standard(Box<Statement>),
}

impl SqlStatement {
    /// Statement kind as shown in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlStatement::CreateMapping { .. } => "CREATE MAPPING",
            SqlStatement::DropMapping { .. } => "DROP MAPPING",
            SqlStatement::CreateJob { .. } => "CREATE JOB",
            SqlStatement::AlterJob { .. } => "ALTER JOB",
            SqlStatement::DropJob { .. } => "DROP JOB",
            SqlStatement::CreateSnapshot { .. } => "CREATE SNAPSHOT",
            SqlStatement::DropSnapshot { .. } => "DROP SNAPSHOT",
            SqlStatement::Standard(_) => "STATEMENT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub statement: SqlStatement,
    pub position: Position,
}

/// Parse exactly one statement; a trailing semicolon is allowed
pub fn parse_statement(sql: &str) -> Result<ParsedStatement, AppError> {
    let dialect = GenericDialect {};
    let parser = Parser::new(&dialect).try_with_sql(sql)?;
    let mut parser = StatementParser { parser };

    while parser.parser.consume_token(&Token::SemiColon) {}
    if parser.peek().token == Token::EOF {
        return Err(AppError::InvalidSql("Empty SQL statement".to_string()));
    }

    let position = parser.position();
    let statement = parser.parse_one()?;

    while parser.parser.consume_token(&Token::SemiColon) {}
    let next = parser.peek();
    if next.token != Token::EOF {
        return Err(AppError::InvalidSql(format!(
            "Expected end of statement, found '{}' at {}",
            next.token,
            location(&next)
        )));
    }

    Ok(ParsedStatement {
        statement,
        position,
    })
}

fn location(token: &TokenWithSpan) -> Position {
    Position::new(token.span.start.line, token.span.start.column)
}

struct StatementParser<'a> {
    parser: Parser<'a>,
}

impl<'a> StatementParser<'a> {
    fn peek(&self) -> TokenWithSpan {
        self.parser.peek_token()
    }

    fn position(&self) -> Position {
        location(&self.peek())
    }

    /// Unquoted word `n` tokens ahead, upper-cased
    fn word_at(&self, n: usize) -> Option<String> {
        match self.parser.peek_nth_token(n).token {
            Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
            _ => None,
        }
    }

    /// Consume the given words if they all follow, in order
    fn parse_words(&mut self, words: &[&str]) -> bool {
        let matches = words
            .iter()
            .enumerate()
            .all(|(i, w)| self.word_at(i).as_deref() == Some(*w));
        if matches {
            for _ in words {
                self.parser.next_token();
            }
        }
        matches
    }

    fn expect_words(&mut self, words: &[&str]) -> Result<(), AppError> {
        if self.parse_words(words) {
            Ok(())
        } else {
            let found = self.peek();
            Err(AppError::InvalidSql(format!(
                "Expected {}, found '{}' at {}",
                words.join(" "),
                found.token,
                location(&found)
            )))
        }
    }

    fn parse_name(&mut self) -> Result<String, AppError> {
        Ok(self.parser.parse_identifier()?.value)
    }

    fn parse_one(&mut self) -> Result<SqlStatement, AppError> {
        match self.word_at(0).as_deref() {
            Some("CREATE") => {
                let mut n = 1;
                let replace = self.word_at(1).as_deref() == Some("OR")
                    && self.word_at(2).as_deref() == Some("REPLACE");
                if replace {
                    n += 2;
                }
                if self.word_at(n).as_deref() == Some("EXTERNAL") {
                    n += 1;
                }
                match self.word_at(n).as_deref() {
                    Some("MAPPING") => {
                        self.advance(n + 1);
                        self.parse_create_mapping(replace)
                    }
                    Some("JOB") => {
                        if replace {
                            return Err(AppError::Validation(
                                "The OR REPLACE option not supported for CREATE JOB".to_string(),
                            ));
                        }
                        self.advance(n + 1);
                        self.parse_create_job()
                    }
                    Some("SNAPSHOT") => {
                        self.advance(n + 1);
                        self.parse_create_snapshot()
                    }
                    _ => self.parse_standard(),
                }
            }
            Some("DROP") => {
                let n = if self.word_at(1).as_deref() == Some("EXTERNAL") { 2 } else { 1 };
                match self.word_at(n).as_deref() {
                    Some("MAPPING") => {
                        self.advance(n + 1);
                        let if_exists = self.parse_words(&["IF", "EXISTS"]);
                        let name = self.parse_name()?;
                        Ok(SqlStatement::DropMapping { name, if_exists })
                    }
                    Some("JOB") if n == 1 => {
                        self.advance(2);
                        self.parse_drop_job()
                    }
                    Some("SNAPSHOT") if n == 1 => {
                        self.advance(2);
                        let if_exists = self.parse_words(&["IF", "EXISTS"]);
                        let name = self.parse_name()?;
                        Ok(SqlStatement::DropSnapshot { name, if_exists })
                    }
                    _ => self.parse_standard(),
                }
            }
            Some("ALTER") if self.word_at(1).as_deref() == Some("JOB") => {
                self.advance(2);
                let name = self.parse_name()?;
                let operation = if self.parse_words(&["SUSPEND"]) {
                    AlterJobOperation::Suspend
                } else if self.parse_words(&["RESUME"]) {
                    AlterJobOperation::Resume
                } else if self.parse_words(&["RESTART"]) {
                    AlterJobOperation::Restart
                } else {
                    let found = self.peek();
                    return Err(AppError::InvalidSql(format!(
                        "Expected SUSPEND, RESUME or RESTART, found '{}' at {}",
                        found.token,
                        location(&found)
                    )));
                };
                Ok(SqlStatement::AlterJob { name, operation })
            }
            _ => self.parse_standard(),
        }
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.parser.next_token();
        }
    }

    fn parse_standard(&mut self) -> Result<SqlStatement, AppError> {
        let statement = self.parser.parse_statement()?;
        Ok(SqlStatement::Standard(Box::new(statement)))
    }

    fn parse_create_mapping(&mut self, replace: bool) -> Result<SqlStatement, AppError> {
        let if_not_exists = self.parse_words(&["IF", "NOT", "EXISTS"]);
        if replace && if_not_exists {
            return Err(AppError::Validation(
                "OR REPLACE in conjunction with IF NOT EXISTS not supported".to_string(),
            ));
        }
        let name = self.parse_name()?;

        let mut columns = Vec::new();
        if self.parser.consume_token(&Token::LParen) {
            loop {
                columns.push(self.parse_column()?);
                if !self.parser.consume_token(&Token::Comma) {
                    break;
                }
            }
            self.parser.expect_token(&Token::RParen)?;
        }

        self.expect_words(&["TYPE"])?;
        let connector_type = self.parse_name()?;
        let options = self.parse_options()?;

        let mut mapping_options = BTreeMap::new();
        for (key, value) in options {
            if mapping_options.insert(key.clone(), value).is_some() {
                return Err(AppError::Validation(format!(
                    "Option '{}' specified more than once",
                    key
                )));
            }
        }

        Ok(SqlStatement::CreateMapping {
            name,
            columns,
            connector_type,
            options: mapping_options,
            replace,
            if_not_exists,
        })
    }

    fn parse_column(&mut self) -> Result<MappingField, AppError> {
        let name = self.parse_name()?;
        let type_position = self.position();
        let data_type = self.parser.parse_data_type()?;
        let scalar_type = ScalarType::from_data_type(&data_type)
            .ok_or_else(|| AppError::unsupported(&data_type, type_position))?;

        let mut field = MappingField::new(name, scalar_type);
        if self.parse_words(&["EXTERNAL", "NAME"]) {
            field.external_name = Some(self.parse_external_name()?);
        }
        Ok(field)
    }

    /// `'text'`, `"quoted"` or a dotted identifier such as `__key.id`
    fn parse_external_name(&mut self) -> Result<String, AppError> {
        let token = self.parser.next_token();
        let at = location(&token);
        let mut name = match token.token {
            Token::SingleQuotedString(s) => return Ok(s),
            Token::Word(w) => w.value,
            other => {
                return Err(AppError::InvalidSql(format!(
                    "Expected external name, found '{}' at {}",
                    other, at
                )))
            }
        };
        while self.parser.consume_token(&Token::Period) {
            name.push('.');
            name.push_str(&self.parse_name()?);
        }
        Ok(name)
    }

    /// `OPTIONS ('k' = 'v', ...)`, absent means no options
    fn parse_options(&mut self) -> Result<Vec<(String, String)>, AppError> {
        let mut options = Vec::new();
        if !self.parse_words(&["OPTIONS"]) {
            return Ok(options);
        }
        self.parser.expect_token(&Token::LParen)?;
        if self.parser.consume_token(&Token::RParen) {
            return Ok(options);
        }
        loop {
            let key = self.parser.parse_literal_string()?;
            self.parser.expect_token(&Token::Eq)?;
            let value = self.parser.parse_literal_string()?;
            options.push((key, value));
            if !self.parser.consume_token(&Token::Comma) {
                break;
            }
        }
        self.parser.expect_token(&Token::RParen)?;
        Ok(options)
    }

    fn parse_create_job(&mut self) -> Result<SqlStatement, AppError> {
        let if_not_exists = self.parse_words(&["IF", "NOT", "EXISTS"]);
        let name = self.parse_name()?;

        let mut job_config = JobConfig::named(name.clone());
        for (key, value) in self.parse_options()? {
            job_config.set_option(&key, &value)?;
        }

        self.expect_words(&["AS"])?;
        let position = self.position();
        let statement = self.parser.parse_statement()?;
        if !matches!(statement, Statement::Insert(_)) {
            return Err(AppError::Validation(format!(
                "A job must be defined by an INSERT statement (at {})",
                position
            )));
        }

        Ok(SqlStatement::CreateJob {
            name,
            job_config,
            if_not_exists,
            insert: Box::new(statement),
        })
    }

    fn parse_drop_job(&mut self) -> Result<SqlStatement, AppError> {
        let if_exists = self.parse_words(&["IF", "EXISTS"]);
        let name = self.parse_name()?;
        let with_snapshot = if self.parse_words(&["WITH", "SNAPSHOT"]) {
            Some(self.parse_name()?)
        } else {
            None
        };
        Ok(SqlStatement::DropJob {
            name,
            if_exists,
            with_snapshot,
        })
    }

    fn parse_create_snapshot(&mut self) -> Result<SqlStatement, AppError> {
        let name = self.parse_name()?;
        self.expect_words(&["FOR", "JOB"])?;
        let job_name = self.parse_name()?;
        Ok(SqlStatement::CreateSnapshot { name, job_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> SqlStatement {
        parse_statement(sql).unwrap().statement
    }

    #[test]
    fn test_create_mapping_full_syntax() {
        let stmt = parse(
            "CREATE OR REPLACE EXTERNAL MAPPING orders (\
                id INT EXTERNAL NAME __key.id, \
                amount DECIMAL(10, 2), \
                b INT EXTERNAL NAME \"b\") \
             TYPE kafka OPTIONS ('valueFormat' = 'json', 'keyFormat' = 'json')",
        );
        match stmt {
            SqlStatement::CreateMapping {
                name,
                columns,
                connector_type,
                options,
                replace,
                if_not_exists,
            } => {
                assert_eq!(name, "orders");
                assert_eq!(connector_type, "kafka");
                assert!(replace);
                assert!(!if_not_exists);
                assert_eq!(columns.len(), 3);
                assert_eq!(columns[0].scalar_type, ScalarType::Integer);
                assert_eq!(columns[0].external_name.as_deref(), Some("__key.id"));
                assert_eq!(columns[1].scalar_type, ScalarType::Decimal);
                assert_eq!(columns[1].external_name, None);
                assert_eq!(columns[2].external_name.as_deref(), Some("b"));
                assert_eq!(options.get("valueFormat").map(String::as_str), Some("json"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_create_mapping_without_columns() {
        match parse("CREATE MAPPING IF NOT EXISTS m TYPE file OPTIONS ('format'='json', 'path'='/tmp')") {
            SqlStatement::CreateMapping { columns, if_not_exists, options, .. } => {
                assert!(columns.is_empty());
                assert!(if_not_exists);
                assert_eq!(options.len(), 2);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_option_rejected() {
        let err = parse_statement("CREATE MAPPING m TYPE file OPTIONS ('a'='1', 'a'='2')").unwrap_err();
        assert!(err.to_string().contains("Option 'a' specified more than once"));
    }

    #[test]
    fn test_replace_with_if_not_exists_rejected() {
        assert!(parse_statement("CREATE OR REPLACE MAPPING IF NOT EXISTS m TYPE file").is_err());
    }

    #[test]
    fn test_drop_mapping() {
        match parse("DROP MAPPING IF EXISTS m;") {
            SqlStatement::DropMapping { name, if_exists } => {
                assert_eq!(name, "m");
                assert!(if_exists);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_job_statements() {
        match parse("CREATE JOB IF NOT EXISTS j OPTIONS ('processingGuarantee'='atLeastOnce') AS INSERT INTO t SELECT * FROM s") {
            SqlStatement::CreateJob { name, job_config, if_not_exists, .. } => {
                assert_eq!(name, "j");
                assert!(if_not_exists);
                assert_eq!(job_config.name.as_deref(), Some("j"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }

        match parse("ALTER JOB j SUSPEND") {
            SqlStatement::AlterJob { name, operation } => {
                assert_eq!(name, "j");
                assert_eq!(operation, AlterJobOperation::Suspend);
            }
            other => panic!("unexpected statement: {:?}", other),
        }

        match parse("DROP JOB IF EXISTS j WITH SNAPSHOT s") {
            SqlStatement::DropJob { name, if_exists, with_snapshot } => {
                assert_eq!(name, "j");
                assert!(if_exists);
                assert_eq!(with_snapshot.as_deref(), Some("s"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_create_job_rejects_or_replace_and_select() {
        let err = parse_statement("CREATE OR REPLACE JOB j AS INSERT INTO t VALUES (1)").unwrap_err();
        assert!(err.to_string().contains("The OR REPLACE option not supported for CREATE JOB"));
        assert!(parse_statement("CREATE JOB j AS SELECT 1").is_err());
    }

    #[test]
    fn test_snapshot_statements() {
        match parse("CREATE OR REPLACE SNAPSHOT s FOR JOB j") {
            SqlStatement::CreateSnapshot { name, job_name } => {
                assert_eq!(name, "s");
                assert_eq!(job_name, "j");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
        match parse("DROP SNAPSHOT s") {
            SqlStatement::DropSnapshot { name, if_exists } => {
                assert_eq!(name, "s");
                assert!(!if_exists);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_standard_statement_passthrough() {
        assert!(matches!(parse("SELECT a FROM t"), SqlStatement::Standard(_)));
        assert!(matches!(parse("CREATE TABLE t (a INT)"), SqlStatement::Standard(_)));
    }

    #[test]
    fn test_single_statement_only() {
        assert!(parse_statement("SELECT 1; SELECT 2").is_err());
        assert!(parse_statement("   ").is_err());
    }
}
