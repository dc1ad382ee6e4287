// Planner
//
// Rule-based translation of validated statements into plans. Every name is
// resolved here: mappings through the catalog and connector registry,
// columns against the resolved table fields. Nothing is optimized.

pub mod expr;

pub use expr::ExprConverter;

use sqlparser::ast::{
    GroupByExpr, Insert, ObjectName, ObjectNamePart, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableObject,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::connector::{ConnectorRegistry, ResolvedTable};
use crate::engine::{Dag, Expression, SinkSpec, SourceSpec};
use crate::models::{
    ColumnMetadata, ExecutionPlan, Mapping, Plan, QueryId, Row, RowMetadata, TableField, Value,
};
use crate::parse::SqlStatement;
use crate::services::MappingCatalog;

pub struct Planner {
    catalog: Arc<MappingCatalog>,
    connectors: Arc<ConnectorRegistry>,
    member_id: Uuid,
}

/// Rows of a SELECT or VALUES before a sink is attached
enum Input {
    /// Constant rows, one expression per column
    Values(Vec<Vec<Expression>>),
    Table {
        table: ResolvedTable,
        predicate: Option<Expression>,
        projection: Vec<Expression>,
    },
}

struct Relation {
    input: Input,
    columns: Vec<ColumnMetadata>,
}

impl Relation {
    fn is_streaming(&self) -> bool {
        matches!(&self.input, Input::Table { table, .. } if table.streaming)
    }

    /// Rewrite each output row expression list, then build the source
    fn into_source(
        self,
        rewrite: impl Fn(Vec<Expression>) -> Result<Vec<Expression>, AppError>,
    ) -> Result<SourceSpec, AppError> {
        match self.input {
            Input::Values(rows) => {
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        rewrite(row)?
                            .iter()
                            .map(|e| e.eval(&[]))
                            .collect::<Result<Row, AppError>>()
                    })
                    .collect::<Result<Vec<Row>, AppError>>()?;
                Ok(SourceSpec::Values { rows })
            }
            Input::Table {
                table,
                predicate,
                projection,
            } => Ok(SourceSpec::Table(table.target.read_processor(
                table.fields.clone(),
                predicate,
                rewrite(projection)?,
            ))),
        }
    }
}

fn not_implemented(what: &str) -> AppError {
    AppError::NotImplemented(format!("{} is not implemented", what))
}

impl Planner {
    pub fn new(catalog: Arc<MappingCatalog>, connectors: Arc<ConnectorRegistry>, member_id: Uuid) -> Self {
        Self {
            catalog,
            connectors,
            member_id,
        }
    }

    pub async fn plan(&self, statement: SqlStatement) -> Result<Plan, AppError> {
        let plan = match statement {
            SqlStatement::CreateMapping {
                name,
                columns,
                connector_type,
                options,
                replace,
                if_not_exists,
            } => {
                let fields = self
                    .connectors
                    .resolve_mapping_fields(&connector_type, &columns, &options, &name)?;
                let mapping = Mapping::new(name, connector_type, fields, options);
                // Fails early on options only needed to read or write
                self.connectors.resolve_table(&mapping)?;
                Plan::CreateMapping {
                    mapping,
                    replace,
                    if_not_exists,
                }
            }
            SqlStatement::DropMapping { name, if_exists } => Plan::DropMapping { name, if_exists },
            SqlStatement::CreateJob {
                name,
                mut job_config,
                if_not_exists,
                insert,
            } => {
                let execution = match insert.as_ref() {
                    Statement::Insert(insert) => self.plan_insert(insert).await?,
                    _ => {
                        return Err(AppError::Validation(
                            "The body of CREATE JOB must be an INSERT statement".to_string(),
                        ))
                    }
                };
                job_config.name = Some(name);
                Plan::CreateJob {
                    dag: execution.dag,
                    job_config,
                    if_not_exists,
                }
            }
            SqlStatement::AlterJob { name, operation } => Plan::AlterJob {
                job_name: name,
                operation,
            },
            SqlStatement::DropJob {
                name,
                if_exists,
                with_snapshot,
            } => Plan::DropJob {
                job_name: name,
                if_exists,
                with_snapshot_name: with_snapshot,
            },
            SqlStatement::CreateSnapshot { name, job_name } => Plan::CreateSnapshot {
                job_name,
                snapshot_name: name,
            },
            SqlStatement::DropSnapshot { name, if_exists } => Plan::DropSnapshot {
                snapshot_name: name,
                if_exists,
            },
            SqlStatement::Standard(statement) => match statement.as_ref() {
                Statement::Query(query) => Plan::Execution(self.plan_select(query).await?),
                Statement::Insert(insert) => Plan::Execution(self.plan_insert(insert).await?),
                other => return Err(AppError::NotImplemented(format!("Planning of {}", other))),
            },
        };
        tracing::debug!("Planned {:?}", plan_kind(&plan));
        Ok(plan)
    }

    async fn plan_select(&self, query: &Query) -> Result<ExecutionPlan, AppError> {
        let relation = self.relation(query).await?;
        let is_streaming = relation.is_streaming();
        let query_id = QueryId::new(self.member_id);
        let row_metadata = Arc::new(RowMetadata::new(relation.columns.clone()));
        let source = relation.into_source(Ok)?;

        Ok(ExecutionPlan {
            dag: Dag::new(source, SinkSpec::QueryResult { query_id }),
            query_id,
            row_metadata,
            is_insert: false,
            is_streaming,
        })
    }

    async fn plan_insert(&self, insert: &Insert) -> Result<ExecutionPlan, AppError> {
        let target = match &insert.table {
            TableObject::TableName(name) => self.table(name).await?,
            other => return Err(AppError::NotImplemented(format!("INSERT INTO {}", other))),
        };
        let source_query = insert
            .source
            .as_ref()
            .ok_or_else(|| AppError::Validation("INSERT requires a source".to_string()))?;

        // Position of each target field among the source columns
        let positions: Vec<Option<usize>> = if insert.columns.is_empty() {
            (0..target.fields.len()).map(Some).collect()
        } else {
            let mut seen = HashSet::new();
            for column in &insert.columns {
                if target.find_field(&column.value).is_none() {
                    return Err(AppError::Validation(format!("Column '{}' not found", column.value)));
                }
                if !seen.insert(column.value.as_str()) {
                    return Err(AppError::Validation(format!(
                        "Column '{}' specified more than once",
                        column.value
                    )));
                }
            }
            target
                .fields
                .iter()
                .map(|field| insert.columns.iter().position(|c| c.value == field.name))
                .collect()
        };
        let expected = positions.iter().flatten().count();

        let relation = self.relation(source_query).await?;
        if relation.columns.len() != expected {
            return Err(AppError::Validation(format!(
                "Number of INSERT target columns ({}) does not equal number of source items ({})",
                expected,
                relation.columns.len()
            )));
        }
        let is_streaming = relation.is_streaming();
        let fields = target.fields.clone();
        let source = relation.into_source(|row| {
            Ok(fields
                .iter()
                .zip(positions.iter())
                .map(|(field, position)| match position {
                    Some(index) => Expression::cast(row[*index].clone(), field.scalar_type),
                    None => Expression::Literal(Value::Null),
                })
                .collect())
        })?;

        let sink = SinkSpec::Table(target.target.write_processor(target.fields.clone()));
        tracing::debug!("Planned INSERT into {} (streaming: {})", target.name, is_streaming);
        Ok(ExecutionPlan {
            dag: Dag::new(source, sink),
            query_id: QueryId::new(self.member_id),
            row_metadata: Arc::new(RowMetadata::default()),
            is_insert: true,
            is_streaming,
        })
    }

    async fn relation(&self, query: &Query) -> Result<Relation, AppError> {
        if query.order_by.is_some() {
            return Err(not_implemented("ORDER BY"));
        }
        match query.body.as_ref() {
            SetExpr::Select(select) => self.select(select).await,
            SetExpr::Query(inner) => Box::pin(self.relation(inner)).await,
            SetExpr::Values(values) => {
                let converter = ExprConverter::new(&[]);
                let rows = values
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|e| converter.convert(e)).collect())
                    .collect::<Result<Vec<Vec<Expression>>, AppError>>()?;
                let width = rows.first().map(Vec::len).unwrap_or(0);
                if rows.iter().any(|row| row.len() != width) {
                    return Err(AppError::Validation("VALUES rows differ in length".to_string()));
                }
                let columns = rows
                    .first()
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .map(|(i, e)| column(format!("EXPR${}", i), e))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Relation {
                    input: Input::Values(rows),
                    columns,
                })
            }
            other => Err(AppError::NotImplemented(format!("{} is not implemented", other))),
        }
    }

    async fn select(&self, select: &Select) -> Result<Relation, AppError> {
        if select.distinct.is_some() {
            return Err(not_implemented("DISTINCT"));
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => {}
            _ => return Err(not_implemented("GROUP BY")),
        }
        if select.having.is_some() {
            return Err(not_implemented("HAVING"));
        }

        match select.from.as_slice() {
            [] => {
                let converter = ExprConverter::new(&[]);
                let (projection, columns) = projection(&converter, &select.projection, &[])?;
                let passes = match &select.selection {
                    Some(selection) => converter.convert(selection)?.is_true(&[])?,
                    None => true,
                };
                let rows = if passes { vec![projection] } else { Vec::new() };
                Ok(Relation {
                    input: Input::Values(rows),
                    columns,
                })
            }
            [from] if from.joins.is_empty() => {
                let name = match &from.relation {
                    TableFactor::Table { name, args: None, .. } => name,
                    other => return Err(AppError::NotImplemented(format!("FROM {}", other))),
                };
                let table = self.table(name).await?;
                let converter = ExprConverter::new(&table.fields);
                let (projection, columns) = projection(&converter, &select.projection, &table.fields)?;
                let predicate = select
                    .selection
                    .as_ref()
                    .map(|selection| converter.convert(selection))
                    .transpose()?;
                Ok(Relation {
                    input: Input::Table {
                        table,
                        predicate,
                        projection,
                    },
                    columns,
                })
            }
            _ => Err(not_implemented("Multiple FROM items")),
        }
    }

    async fn table(&self, name: &ObjectName) -> Result<ResolvedTable, AppError> {
        let not_found = || AppError::NotFound(format!("Object '{}' not found", name));
        let table_name = match name.0.as_slice() {
            [ObjectNamePart::Identifier(ident)] => ident.value.clone(),
            _ => return Err(not_found()),
        };
        let stored = self.catalog.get_mapping(&table_name).await?.ok_or_else(not_found)?;
        self.connectors.resolve_table(&stored.mapping)
    }
}

fn column(name: String, expression: &Expression) -> ColumnMetadata {
    ColumnMetadata {
        name,
        scalar_type: expression.return_type(),
    }
}

fn projection(
    converter: &ExprConverter<'_>,
    items: &[SelectItem],
    fields: &[TableField],
) -> Result<(Vec<Expression>, Vec<ColumnMetadata>), AppError> {
    let mut expressions = Vec::new();
    let mut columns = Vec::new();
    for item in items {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let expression = converter.convert(expr)?;
                let name = match expr {
                    sqlparser::ast::Expr::Identifier(ident) => ident.value.clone(),
                    sqlparser::ast::Expr::CompoundIdentifier(parts) => parts
                        .last()
                        .map(|ident| ident.value.clone())
                        .unwrap_or_else(|| format!("EXPR${}", columns.len())),
                    _ => format!("EXPR${}", columns.len()),
                };
                columns.push(column(name, &expression));
                expressions.push(expression);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let expression = converter.convert(expr)?;
                columns.push(column(alias.value.clone(), &expression));
                expressions.push(expression);
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                if fields.is_empty() {
                    return Err(AppError::Validation("SELECT * requires a FROM clause".to_string()));
                }
                for (index, field) in fields.iter().enumerate() {
                    let expression = Expression::column(index, field.scalar_type);
                    columns.push(column(field.name.clone(), &expression));
                    expressions.push(expression);
                }
            }
        }
    }
    Ok((expressions, columns))
}

fn plan_kind(plan: &Plan) -> &'static str {
    match plan {
        Plan::CreateMapping { .. } => "CreateMapping",
        Plan::DropMapping { .. } => "DropMapping",
        Plan::CreateJob { .. } => "CreateJob",
        Plan::AlterJob { .. } => "AlterJob",
        Plan::DropJob { .. } => "DropJob",
        Plan::CreateSnapshot { .. } => "CreateSnapshot",
        Plan::DropSnapshot { .. } => "DropSnapshot",
        Plan::Execution(execution) if execution.is_insert => "Execution(INSERT)",
        Plan::Execution(_) => "Execution(SELECT)",
    }
}
