use sqlx::AnyConnection;

use crate::database::entity::{EntityDef, EntityRegistry};
use crate::database::error::DataError;

/// `CREATE TABLE IF NOT EXISTS` plus indexes for one entity.
/// Uses only types and syntax shared by Postgres and SQLite.
pub fn create_table_statements(entity: &EntityDef) -> Vec<String> {
    let mut definitions: Vec<String> = entity
        .columns
        .iter()
        .map(|column| {
            let mut sql = format!("\"{}\" {}", column.name, column.column_type.sql_type());
            if column.name == "id" {
                sql.push_str(" PRIMARY KEY");
            } else if column.required {
                sql.push_str(" NOT NULL");
            }
            sql
        })
        .collect();

    for key in &entity.unique_keys {
        let columns = key.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
        definitions.push(format!("UNIQUE ({})", columns));
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        entity.table,
        definitions.join(", ")
    )];

    if entity.organization_scoped {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS \"{table}_organization_id_idx\" ON \"{table}\" (\"organization_id\")",
            table = entity.table
        ));
    }

    statements
}

/// Create every missing table of the registry
pub async fn migrate(conn: &mut AnyConnection, entities: &EntityRegistry) -> Result<usize, DataError> {
    let mut executed = 0;
    for entity in entities.iter() {
        for statement in create_table_statements(entity) {
            sqlx::query(&statement).execute(&mut *conn).await?;
            executed += 1;
        }
        tracing::debug!("Ensured table {}", entity.table);
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entity::ColumnType;

    #[test]
    fn renders_portable_ddl() {
        let entity = EntityDef::scoped("projects", "pms")
            .required("name", ColumnType::Text)
            .column("code", ColumnType::Text)
            .column("budget", ColumnType::Integer)
            .unique(&["organization_id", "code"]);

        let statements = create_table_statements(&entity);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"pms_projects\" (\"id\" TEXT PRIMARY KEY, \"organization_id\" TEXT"));
        assert!(statements[0].contains("\"name\" TEXT NOT NULL"));
        assert!(statements[0].contains("\"budget\" BIGINT"));
        assert!(statements[0].ends_with("UNIQUE (\"organization_id\", \"code\"))"));
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS \"pms_projects_organization_id_idx\" ON \"pms_projects\" (\"organization_id\")"
        );
    }

    #[test]
    fn unscoped_tables_have_no_org_index() {
        let entity = EntityDef::bare("settings", "");
        assert_eq!(create_table_statements(&entity).len(), 1);
    }
}
