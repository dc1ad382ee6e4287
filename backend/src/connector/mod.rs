// Connector Metadata Resolution
//
// Turns the columns a user declared (or the data found by sampling the
// external source) into typed, addressable fields plus the target descriptors
// the planner hands to the job engine. Resolvers are keyed by
// (connector, format) and registered once at startup.

pub mod avro;
pub mod file;
pub mod imap;
pub mod json;
pub mod kafka;
pub mod projector;
pub mod target;

pub use projector::{Payload, RowProjector};
pub use target::{ReadProcessorSupplier, TargetDescriptor, WriteProcessorSupplier};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::engine::MapStore;
use crate::models::{Mapping, MappingField, MappingOptions, QueryPath, TableField};

pub const FILE_CONNECTOR: &str = "file";
pub const IMAP_CONNECTOR: &str = "imap";
pub const KAFKA_CONNECTOR: &str = "kafka";

pub const JSON_FORMAT: &str = "json";
pub const AVRO_FORMAT: &str = "avro";

pub const OPTION_PATH: &str = "path";
pub const OPTION_GLOB: &str = "glob";
pub const OPTION_FORMAT: &str = "format";
pub const OPTION_KEY_FORMAT: &str = "keyFormat";
pub const OPTION_VALUE_FORMAT: &str = "valueFormat";
pub const OPTION_MAP_NAME: &str = "mapName";
pub const OPTION_TOPIC: &str = "topic";

/// How rows of one side are decoded when read
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTargetDescriptor {
    Json,
    Avro,
}

/// How rows of one side are encoded when written
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertTargetDescriptor {
    Json,
    Avro { schema: String },
}

/// Resolved fields of one side (key or value) with its read/write descriptors
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub fields: Vec<TableField>,
    pub query_target: QueryTargetDescriptor,
    pub upsert_target: UpsertTargetDescriptor,
}

pub trait MetadataResolver: Send + Sync {
    /// Fields of one side. An empty `user_fields` list asks the resolver to
    /// sample the source; otherwise the declared fields of that side are
    /// validated and de-duplicated.
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        options: &MappingOptions,
        mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError>;

    /// Final table fields and target descriptors of one side
    fn resolve_metadata(
        &self,
        is_key: bool,
        fields: &[MappingField],
        options: &MappingOptions,
    ) -> Result<EntryMetadata, AppError>;
}

/// A mapping resolved for planning
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub name: String,
    /// In mapping declaration order
    pub fields: Vec<TableField>,
    pub target: TargetDescriptor,
    pub streaming: bool,
}

impl ResolvedTable {
    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

pub struct ConnectorRegistry {
    resolvers: HashMap<(&'static str, &'static str), Arc<dyn MetadataResolver>>,
}

impl ConnectorRegistry {
    pub fn with_defaults(maps: Arc<MapStore>) -> Self {
        let mut resolvers: HashMap<(&'static str, &'static str), Arc<dyn MetadataResolver>> =
            HashMap::new();
        resolvers.insert((FILE_CONNECTOR, AVRO_FORMAT), Arc::new(file::FileAvroResolver));
        resolvers.insert((FILE_CONNECTOR, JSON_FORMAT), Arc::new(file::FileJsonResolver));
        resolvers.insert((IMAP_CONNECTOR, JSON_FORMAT), Arc::new(imap::MapJsonResolver::new(maps)));
        resolvers.insert((KAFKA_CONNECTOR, AVRO_FORMAT), Arc::new(kafka::KafkaAvroResolver));
        resolvers.insert((KAFKA_CONNECTOR, JSON_FORMAT), Arc::new(kafka::KafkaJsonResolver));
        tracing::debug!("Registered {} metadata resolvers", resolvers.len());
        Self { resolvers }
    }

    pub fn resolver(&self, connector: &str, format: &str) -> Result<Arc<dyn MetadataResolver>, AppError> {
        let connector = connector.to_ascii_lowercase();
        let format = format.to_ascii_lowercase();
        self.resolvers
            .iter()
            .find(|((c, f), _)| *c == connector && *f == format)
            .map(|(_, resolver)| resolver.clone())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Unsupported format '{}' for connector '{}'",
                    format, connector
                ))
            })
    }

    /// Resolve the field list stored with a new mapping
    pub fn resolve_mapping_fields(
        &self,
        connector_type: &str,
        user_fields: &[MappingField],
        options: &MappingOptions,
        mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        let mut resolved = Vec::new();
        for (is_key, format) in self.sides(connector_type, options)? {
            let resolver = self.resolver(connector_type, &format)?;
            resolved.extend(resolver.resolve_fields(is_key, user_fields, options, mapping_name)?);
        }

        if user_fields.is_empty() {
            return Ok(dedupe(resolved));
        }

        // Merge both sides back into declaration order
        let mut ordered = Vec::with_capacity(resolved.len());
        for declared in user_fields {
            if let Some(index) = resolved.iter().position(|f| f.name == declared.name) {
                ordered.push(resolved.remove(index));
            }
        }
        ordered.extend(resolved);
        Ok(ordered)
    }

    /// Fields and target descriptor of a stored mapping
    pub fn resolve_table(&self, mapping: &Mapping) -> Result<ResolvedTable, AppError> {
        let fields = to_table_fields(&mapping.fields)?;
        let mut key = None;
        let mut value = None;
        for (is_key, format) in self.sides(&mapping.connector_type, &mapping.options)? {
            let resolver = self.resolver(&mapping.connector_type, &format)?;
            let metadata = resolver.resolve_metadata(is_key, &mapping.fields, &mapping.options)?;
            if is_key {
                key = Some(metadata);
            } else {
                value = Some(metadata);
            }
        }
        let value = value.ok_or_else(|| {
            AppError::IllegalState(format!("No value side resolved for mapping {}", mapping.name))
        })?;

        let target = match mapping.connector_type.to_ascii_lowercase().as_str() {
            FILE_CONNECTOR => {
                let path = required_option(&mapping.options, OPTION_PATH)?.to_string();
                let glob = option_or(&mapping.options, OPTION_GLOB, "*").to_string();
                match value.upsert_target {
                    UpsertTargetDescriptor::Avro { schema } => TargetDescriptor::FileAvro { path, glob, schema },
                    UpsertTargetDescriptor::Json => TargetDescriptor::FileJson { path, glob },
                }
            }
            IMAP_CONNECTOR => TargetDescriptor::MapJson {
                map_name: option_or(&mapping.options, OPTION_MAP_NAME, &mapping.name).to_string(),
            },
            KAFKA_CONNECTOR => {
                let topic = option_or(&mapping.options, OPTION_TOPIC, &mapping.name).to_string();
                match (&value.query_target, value.upsert_target) {
                    (QueryTargetDescriptor::Avro, UpsertTargetDescriptor::Avro { schema }) => {
                        let key_schema = key.and_then(|k| match k.upsert_target {
                            UpsertTargetDescriptor::Avro { schema } if !k.fields.is_empty() => Some(schema),
                            _ => None,
                        });
                        TargetDescriptor::KafkaAvro {
                            topic,
                            key_schema,
                            value_schema: schema,
                        }
                    }
                    _ => TargetDescriptor::KafkaJson { topic },
                }
            }
            other => return Err(unknown_connector(other)),
        };

        let streaming = target.is_unbounded();
        Ok(ResolvedTable {
            name: mapping.name.clone(),
            fields,
            target,
            streaming,
        })
    }

    /// (is_key, format) pairs a connector reads and writes
    fn sides(&self, connector_type: &str, options: &MappingOptions) -> Result<Vec<(bool, String)>, AppError> {
        match connector_type.to_ascii_lowercase().as_str() {
            FILE_CONNECTOR => Ok(vec![(false, required_option(options, OPTION_FORMAT)?.to_string())]),
            IMAP_CONNECTOR => Ok(vec![
                (true, option_or(options, OPTION_KEY_FORMAT, JSON_FORMAT).to_string()),
                (false, option_or(options, OPTION_VALUE_FORMAT, JSON_FORMAT).to_string()),
            ]),
            KAFKA_CONNECTOR => {
                let key_format = option_or(options, OPTION_KEY_FORMAT, JSON_FORMAT);
                let value_format = option_or(options, OPTION_VALUE_FORMAT, JSON_FORMAT);
                if !key_format.eq_ignore_ascii_case(value_format) {
                    return Err(AppError::Validation(format!(
                        "{} and {} must be equal, found '{}' and '{}'",
                        OPTION_KEY_FORMAT, OPTION_VALUE_FORMAT, key_format, value_format
                    )));
                }
                Ok(vec![(true, key_format.to_string()), (false, value_format.to_string())])
            }
            other => Err(unknown_connector(other)),
        }
    }
}

fn unknown_connector(connector_type: &str) -> AppError {
    AppError::Validation(format!("Unknown connector type: {}", connector_type))
}

pub fn required_option<'a>(options: &'a MappingOptions, key: &str) -> Result<&'a str, AppError> {
    options
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| AppError::Validation(format!("Missing option: {}", key)))
}

pub fn option_or<'a>(options: &'a MappingOptions, key: &str, default: &'a str) -> &'a str {
    options.get(key).map(String::as_str).unwrap_or(default)
}

/// Declared fields of one side, validated and de-duplicated by name. External
/// names are normalized to their full `__key.`/`this.` form.
pub fn declared_side_fields(is_key: bool, user_fields: &[MappingField]) -> Result<Vec<MappingField>, AppError> {
    let mut side = Vec::new();
    for field in user_fields {
        let external_name = field.external_name_or_name();
        let path = QueryPath::parse(external_name)?;
        if path.is_key() != is_key {
            continue;
        }
        if path.is_top() {
            return Err(AppError::Validation(format!("Invalid external name '{}'", external_name)));
        }
        side.push(field.clone().with_external_name(path.to_string()));
    }
    Ok(dedupe(side))
}

/// Keep the first field of each name
fn dedupe(fields: Vec<MappingField>) -> Vec<MappingField> {
    let mut seen = HashSet::new();
    fields
        .into_iter()
        .filter(|field| seen.insert(field.name.clone()))
        .collect()
}

/// Table fields of one side
pub fn side_table_fields(is_key: bool, fields: &[MappingField]) -> Result<Vec<TableField>, AppError> {
    Ok(to_table_fields(fields)?
        .into_iter()
        .filter(|f| f.is_key() == is_key)
        .collect())
}

pub fn to_table_fields(fields: &[MappingField]) -> Result<Vec<TableField>, AppError> {
    fields
        .iter()
        .map(|field| {
            let path = QueryPath::parse(field.external_name_or_name())?;
            Ok(TableField::new(field.name.clone(), field.scalar_type, path))
        })
        .collect()
}
