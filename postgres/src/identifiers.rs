use pg_escape::quote_identifier;

/// Quotes a possibly schema qualified table name (`table` or `schema.table`).
///
/// Each part is quoted on its own so that `public.events` becomes `public.events` and
/// `My Schema.Events` becomes `"My Schema"."Events"`.
pub fn quote_table_name(table_name: &str) -> String {
    table_name
        .split('.')
        .map(|part| quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a single column name.
pub fn quote_column_name(column_name: &str) -> String {
    quote_identifier(column_name).into_owned()
}
