//! Inventory item table

use super::codec::{
    conversion_error, format_date, format_timestamp, opt_date_at, opt_timestamp_at, timestamp_at,
};
use super::query::{column, order_clause, where_clause, SqlParams};
use crate::error::Result;
use crate::inventory::{InventoryItem, ItemState, Location};
use crate::store::{AggregationRequest, Bucket, BucketStats, ItemQuery, Mean, Tally};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Group key used when an item has no value for a grouped field
pub const UNKNOWN_KEY: &str = "Unknown";

const ITEM_COLUMNS: &str = "id, schema_version, account_id, serial_number, item_number, \
     item_type, code, carat_range, quality, metal_type, metal_code, carat_code, \
     total_carat_weight, unit_price, description, date_created, location_code, \
     shipment_date, salesperson_code, state, first_seen_at, last_seen_at, sold_at, \
     created_at, updated_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    let state: String = row.get(19)?;
    let state = state
        .parse::<ItemState>()
        .map_err(|e| conversion_error(19, e.to_string()))?;

    Ok(InventoryItem {
        id: row.get(0)?,
        schema_version: row.get(1)?,
        account_id: row.get(2)?,
        serial_number: row.get(3)?,
        item_number: row.get(4)?,
        item_type: row.get(5)?,
        code: row.get(6)?,
        carat_range: row.get(7)?,
        quality: row.get(8)?,
        metal_type: row.get(9)?,
        metal_code: row.get(10)?,
        carat_code: row.get(11)?,
        total_carat_weight: row.get(12)?,
        unit_price: row.get(13)?,
        description: row.get(14)?,
        date_created: opt_date_at(row, 15)?,
        location_code: row
            .get::<_, Option<String>>(16)?
            .map(|code| Location::from_stored(&code)),
        shipment_date: opt_date_at(row, 17)?,
        salesperson_code: row.get(18)?,
        state,
        first_seen_at: opt_timestamp_at(row, 20)?,
        last_seen_at: opt_timestamp_at(row, 21)?,
        sold_at: opt_timestamp_at(row, 22)?,
        created_at: timestamp_at(row, 23)?,
        updated_at: timestamp_at(row, 24)?,
    })
}

/// Get item by id
pub fn find(conn: &Connection, id: &str) -> Result<Option<InventoryItem>> {
    let sql = format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS);
    Ok(conn.query_row(&sql, [id], item_from_row).optional()?)
}

/// Get the lowest-id item carrying `serial_number` in the account
pub fn find_by_serial(
    conn: &Connection,
    account_id: &str,
    serial_number: &str,
) -> Result<Option<InventoryItem>> {
    let sql = format!(
        "SELECT {} FROM items WHERE account_id = ? AND serial_number = ? ORDER BY id LIMIT 1",
        ITEM_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [account_id, serial_number], item_from_row)
        .optional()?)
}

/// Insert or replace an item by id
pub fn upsert(conn: &Connection, item: &InventoryItem) -> Result<()> {
    let sql = format!(
        "INSERT INTO items ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, \
         ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
         ON CONFLICT(id) DO UPDATE SET
            schema_version = excluded.schema_version,
            account_id = excluded.account_id,
            serial_number = excluded.serial_number,
            item_number = excluded.item_number,
            item_type = excluded.item_type,
            code = excluded.code,
            carat_range = excluded.carat_range,
            quality = excluded.quality,
            metal_type = excluded.metal_type,
            metal_code = excluded.metal_code,
            carat_code = excluded.carat_code,
            total_carat_weight = excluded.total_carat_weight,
            unit_price = excluded.unit_price,
            description = excluded.description,
            date_created = excluded.date_created,
            location_code = excluded.location_code,
            shipment_date = excluded.shipment_date,
            salesperson_code = excluded.salesperson_code,
            state = excluded.state,
            first_seen_at = excluded.first_seen_at,
            last_seen_at = excluded.last_seen_at,
            sold_at = excluded.sold_at,
            updated_at = excluded.updated_at",
        ITEM_COLUMNS
    );

    conn.execute(
        &sql,
        params![
            item.id,
            item.schema_version,
            item.account_id,
            item.serial_number,
            item.item_number,
            item.item_type,
            item.code,
            item.carat_range,
            item.quality,
            item.metal_type,
            item.metal_code,
            item.carat_code,
            item.total_carat_weight,
            item.unit_price,
            item.description,
            item.date_created.map(format_date),
            item.location_code.as_ref().map(|l| l.as_str().to_string()),
            item.shipment_date.map(format_date),
            item.salesperson_code,
            item.state.as_str(),
            item.first_seen_at.map(format_timestamp),
            item.last_seen_at.map(format_timestamp),
            item.sold_at.map(format_timestamp),
            format_timestamp(item.created_at),
            format_timestamp(item.updated_at),
        ],
    )?;

    Ok(())
}

/// Delete an item by id
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM items WHERE id = ?", [id])?;
    Ok(removed > 0)
}

/// Items matching a query
pub fn search(conn: &Connection, query: &ItemQuery) -> Result<Vec<InventoryItem>> {
    let mut params = SqlParams::default();
    let filter = where_clause(query, &mut params);
    let mut sql = format!(
        "SELECT {} FROM items WHERE {} ORDER BY {}",
        ITEM_COLUMNS,
        filter,
        order_clause(&query.sort)
    );
    if let Some(limit) = query.limit {
        let placeholder = params.bind(SqlValue::Integer(limit as i64));
        sql.push_str(&format!(" LIMIT {}", placeholder));
    }

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(params.values()), item_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Count items matching a query
pub fn count(conn: &Connection, query: &ItemQuery) -> Result<u64> {
    let mut params = SqlParams::default();
    let filter = where_clause(query, &mut params);
    let sql = format!("SELECT COUNT(*) FROM items WHERE {}", filter);
    let count: i64 = conn.query_row(&sql, params_from_iter(params.values()), |row| row.get(0))?;
    Ok(count as u64)
}

/// Grouped metric extraction.
///
/// One row per distinct group tuple; rows are folded into a bucket tree so
/// every outer level carries the sum of its children.
pub fn aggregate(conn: &Connection, request: &AggregationRequest) -> Result<Bucket> {
    request.validate()?;

    let mut params = SqlParams::default();
    let now = params.bind(SqlValue::Text(format_timestamp(request.now)));
    let from = params.bind(SqlValue::Text(format_timestamp(request.window.from)));
    let to = params.bind(SqlValue::Text(format_timestamp(request.window.to)));

    let on_hand = "state = 'instock'";
    let in_jobs = "state = 'onjobs'";
    let sold = format!(
        "state = 'sales' AND sold_at >= {} AND sold_at <= {}",
        from, to
    );
    let memo = format!("{} AND location_code = 'on_memo'", on_hand);
    let house = format!(
        "{} AND (location_code = 'house' OR location_code IS NULL)",
        on_hand
    );

    let groups: Vec<String> = request
        .group_by
        .iter()
        .map(|f| format!("COALESCE({}, '{}')", column(*f), UNKNOWN_KEY))
        .collect();

    let mut select = groups.clone();
    select.extend([
        format!("COUNT(CASE WHEN {} THEN 1 END)", on_hand),
        format!("TOTAL(CASE WHEN {} THEN unit_price END)", on_hand),
        format!("COUNT(CASE WHEN {} THEN 1 END)", in_jobs),
        format!("TOTAL(CASE WHEN {} THEN unit_price END)", in_jobs),
        format!("COUNT(CASE WHEN {} THEN 1 END)", sold),
        format!("TOTAL(CASE WHEN {} THEN unit_price END)", sold),
        format!("COUNT(CASE WHEN {} THEN 1 END)", memo),
        format!(
            "TOTAL(CASE WHEN {} AND date_created IS NOT NULL \
             THEN julianday({}) - julianday(date_created) END)",
            on_hand, now
        ),
        format!(
            "COUNT(CASE WHEN {} AND date_created IS NOT NULL THEN 1 END)",
            on_hand
        ),
        format!(
            "TOTAL(CASE WHEN {} AND date_created IS NOT NULL \
             THEN julianday(sold_at) - julianday(date_created) END)",
            sold
        ),
        format!(
            "COUNT(CASE WHEN {} AND date_created IS NOT NULL THEN 1 END)",
            sold
        ),
        format!(
            "TOTAL(CASE WHEN {} AND shipment_date IS NOT NULL \
             THEN julianday({}) - julianday(shipment_date) END)",
            memo, now
        ),
        format!(
            "COUNT(CASE WHEN {} AND shipment_date IS NOT NULL THEN 1 END)",
            memo
        ),
        format!("COUNT(CASE WHEN {} THEN 1 END)", house),
    ]);

    let filter = where_clause(&request.query, &mut params);
    let mut sql = format!("SELECT {} FROM items WHERE {}", select.join(", "), filter);
    if !groups.is_empty() {
        let positions: Vec<String> = (1..=groups.len()).map(|i| i.to_string()).collect();
        sql.push_str(&format!(
            " GROUP BY {} ORDER BY {}",
            positions.join(", "),
            positions.join(", ")
        ));
    }

    let levels = groups.len();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.values()), |row| {
            let keys = (0..levels)
                .map(|i| row.get::<_, String>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((keys, stats_from_row(row, levels)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut root = Bucket::new("");
    for (keys, stats) in &rows {
        root.insert(keys, stats);
    }

    Ok(root)
}

fn stats_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<BucketStats> {
    let count = |i: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(offset + i)? as u64) };
    let total = |i: usize| -> rusqlite::Result<f64> { row.get::<_, f64>(offset + i) };

    Ok(BucketStats {
        inventory: Tally {
            count: count(0)?,
            value: total(1)?,
        },
        jobs: Tally {
            count: count(2)?,
            value: total(3)?,
        },
        sales: Tally {
            count: count(4)?,
            value: total(5)?,
        },
        on_memo: count(6)?,
        in_house: count(13)?,
        inventory_age: Mean {
            total: total(7)?,
            samples: count(8)?,
        },
        sales_age: Mean {
            total: total(9)?,
            samples: count(10)?,
        },
        memo_days: Mean {
            total: total(11)?,
            samples: count(12)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;
    use crate::store::{Field, SalesWindow};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn item(serial: &str, item_type: &str, state: ItemState, price: f64) -> InventoryItem {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut item = InventoryItem::new("acct", serial, state, now);
        item.item_type = Some(item_type.to_string());
        item.carat_range = Some("1.40-1.69".to_string());
        item.unit_price = price;
        item
    }

    #[test]
    fn test_upsert_and_find_round_trip() {
        let conn = setup();
        let mut ring = item("1001", "Rings", ItemState::InStock, 1234.5);
        ring.location_code = Some(Location::OnMemo);
        ring.date_created = NaiveDate::from_ymd_opt(2024, 1, 15);
        ring.total_carat_weight = Some(1.55);
        upsert(&conn, &ring).unwrap();

        let loaded = find(&conn, &ring.id).unwrap().unwrap();
        assert_eq!(loaded, ring);
        assert_eq!(loaded.unit_price, 1234.5);

        ring.unit_price = 999.99;
        upsert(&conn, &ring).unwrap();
        let loaded = find_by_serial(&conn, "acct", "1001").unwrap().unwrap();
        assert_eq!(loaded.unit_price, 999.99);
        assert_eq!(count(&conn, &ItemQuery::for_account("acct")).unwrap(), 1);
    }

    #[test]
    fn test_find_by_serial_prefers_lowest_id() {
        let conn = setup();
        let mut a = item("2002", "Studs", ItemState::InStock, 10.0);
        let mut b = item("2002", "Studs", ItemState::InStock, 20.0);
        a.id = "b-id".to_string();
        b.id = "a-id".to_string();
        upsert(&conn, &a).unwrap();
        upsert(&conn, &b).unwrap();

        let found = find_by_serial(&conn, "acct", "2002").unwrap().unwrap();
        assert_eq!(found.id, "a-id");
        assert!(find_by_serial(&conn, "other", "2002").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let conn = setup();
        let ring = item("1", "Rings", ItemState::Pending, 1.0);
        upsert(&conn, &ring).unwrap();
        assert!(delete(&conn, &ring.id).unwrap());
        assert!(!delete(&conn, &ring.id).unwrap());
        assert!(find(&conn, &ring.id).unwrap().is_none());
    }

    #[test]
    fn test_search_with_limit_and_sort() {
        let conn = setup();
        for (serial, price) in [("1", 30.0), ("2", 10.0), ("3", 20.0)] {
            upsert(&conn, &item(serial, "Rings", ItemState::InStock, price)).unwrap();
        }
        upsert(&conn, &item("4", "Rings", ItemState::OnJobs, 5.0)).unwrap();

        let query = ItemQuery::for_account("acct")
            .term(Field::State, "instock")
            .sort_by(Field::UnitPrice, crate::store::SortOrder::Asc)
            .limit(2);
        let found = search(&conn, &query).unwrap();
        let serials: Vec<_> = found.iter().map(|i| i.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["2", "3"]);
    }

    #[test]
    fn test_aggregate_nested_groups() {
        let conn = setup();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let mut memo = item("1", "Rings", ItemState::InStock, 100.0);
        memo.location_code = Some(Location::OnMemo);
        memo.shipment_date = Some(now.date_naive() - Duration::days(20));
        memo.date_created = Some(now.date_naive() - Duration::days(100));
        upsert(&conn, &memo).unwrap();

        upsert(&conn, &item("2", "Rings", ItemState::OnJobs, 50.0)).unwrap();

        let mut sold = item("3", "Studs", ItemState::Sales, 75.0);
        sold.sold_at = Some(now - Duration::days(3));
        sold.date_created = Some(now.date_naive() - Duration::days(33));
        upsert(&conn, &sold).unwrap();

        let mut old_sale = item("4", "Studs", ItemState::Sales, 500.0);
        old_sale.sold_at = Some(now - Duration::days(800));
        upsert(&conn, &old_sale).unwrap();

        let request = AggregationRequest {
            query: ItemQuery::for_account("acct"),
            group_by: vec![Field::CaratRange, Field::Type],
            window: SalesWindow {
                from: now - Duration::days(365),
                to: now,
            },
            now,
        };
        let root = aggregate(&conn, &request).unwrap();

        assert_eq!(root.stats.inventory, Tally { count: 1, value: 100.0 });
        assert_eq!(root.stats.jobs, Tally { count: 1, value: 50.0 });
        assert_eq!(root.stats.sales, Tally { count: 1, value: 75.0 });

        let rings = root.descend(&["1.40-1.69", "Rings"]).unwrap();
        assert_eq!(rings.stats.on_memo, 1);
        assert_eq!(rings.stats.in_house, 0);
        assert!((rings.stats.memo_days.value() - 20.5).abs() < 1e-6);
        assert!((rings.stats.inventory_age.value() - 100.5).abs() < 1e-6);

        let studs = root.descend(&["1.40-1.69", "Studs"]).unwrap();
        assert_eq!(studs.stats.sales.count, 1);
        assert!((studs.stats.sales_age.value() - 30.5).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_without_groups_returns_totals() {
        let conn = setup();
        let now = Utc::now();
        let request = AggregationRequest {
            query: ItemQuery::for_account("acct"),
            group_by: vec![],
            window: SalesWindow { from: now, to: now },
            now,
        };
        let root = aggregate(&conn, &request).unwrap();
        assert!(root.stats.is_empty());
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_in_house_excludes_other_locations() {
        let conn = setup();
        let mut house = item("1", "Rings", ItemState::InStock, 1.0);
        house.location_code = Some(Location::House);
        upsert(&conn, &house).unwrap();
        upsert(&conn, &item("2", "Rings", ItemState::InStock, 1.0)).unwrap();

        let mut memo = item("3", "Rings", ItemState::InStock, 1.0);
        memo.location_code = Some(Location::OnMemo);
        upsert(&conn, &memo).unwrap();

        let mut repair = item("4", "Rings", ItemState::InStock, 1.0);
        repair.location_code = Some(Location::Other("repair shop".into()));
        upsert(&conn, &repair).unwrap();

        let mut jobs = item("5", "Rings", ItemState::OnJobs, 1.0);
        jobs.location_code = Some(Location::House);
        upsert(&conn, &jobs).unwrap();

        let now = Utc::now();
        let request = AggregationRequest {
            query: ItemQuery::for_account("acct"),
            group_by: vec![Field::Type],
            window: SalesWindow { from: now, to: now },
            now,
        };
        let rings = aggregate(&conn, &request).unwrap().children.remove(0);
        assert_eq!(rings.stats.inventory.count, 4);
        assert_eq!(rings.stats.in_house, 2);
        assert_eq!(rings.stats.on_memo, 1);
    }

    #[test]
    fn test_missing_group_value_is_unknown() {
        let conn = setup();
        let mut bare = item("9", "Rings", ItemState::InStock, 1.0);
        bare.carat_range = None;
        upsert(&conn, &bare).unwrap();

        let now = Utc::now();
        let request = AggregationRequest {
            query: ItemQuery::for_account("acct"),
            group_by: vec![Field::CaratRange],
            window: SalesWindow { from: now, to: now },
            now,
        };
        let root = aggregate(&conn, &request).unwrap();
        assert_eq!(root.children[0].key, UNKNOWN_KEY);
    }
}
