//! Built-in template library.
//!
//! Written against the Snowflake `ACCOUNT_USAGE` views. Table names are
//! structural placeholders resolved from configuration, dates are literal
//! placeholders, and the optional per-user filter is the `{user_filter}`
//! clause.

use crate::registry::TemplateSource;

/// Every statically declared namespace, registered by
/// [`TemplateRegistry::builtin`](crate::registry::TemplateRegistry::builtin).
pub static SOURCES: &[TemplateSource] = &[COMMON, USER_360];

/// Credits per hour by warehouse size.
macro_rules! warehouse_rates {
    () => {
        "WITH warehouse_rates AS (
            SELECT * FROM VALUES
                ('X-Small', 1), ('Small', 2), ('Medium', 4), ('Large', 8),
                ('X-Large', 16), ('2X-Large', 32), ('3X-Large', 64), ('4X-Large', 128)
            AS warehouse_size(size, credits_per_hour)
        )"
    };
}

/// Dollar cost of one query row joined to `warehouse_rates` as `wr`.
macro_rules! query_cost {
    () => {
        "qh.total_elapsed_time / 1000.0 / 3600.0 * wr.credits_per_hour * 3.0"
    };
}

pub const COMMON: TemplateSource = TemplateSource {
    namespace: "common",
    templates: &[(
        "get_distinct_users_30_days",
        "SELECT DISTINCT user_name
        FROM {query_history_table}
        WHERE start_time >= CURRENT_DATE - 30
        ORDER BY user_name",
    )],
};

pub const USER_360: TemplateSource = TemplateSource {
    namespace: "user_360",
    templates: &[
        (
            "credits_by_user",
            concat!(
                warehouse_rates!(),
                "
        SELECT
            qh.user_name AS user_name,
            ROUND(SUM(qh.total_elapsed_time / 1000.0 / 3600.0 * wr.credits_per_hour), 4) AS credits_used
        FROM {query_history_table} qh
        JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
        WHERE qh.start_time >= {start_date}
        AND qh.start_time < {end_date}
        AND qh.user_name = {:user_name}
        GROUP BY qh.user_name"
            ),
        ),
        (
            "total_queries_run",
            "SELECT COUNT(*) AS metric_value
        FROM {query_history_table}
        WHERE start_time >= {start_date}
        AND start_time < {end_date}
        AND user_name IS NOT NULL
        {user_filter}
        AND query_type NOT IN ('DESCRIBE', 'SHOW', 'USE')
        AND execution_status IN ('SUCCESS', 'FAIL')",
        ),
        (
            "total_users_defined",
            "SELECT COUNT(*) AS metric_value
        FROM {users_table}
        WHERE deleted_on IS NULL",
        ),
        (
            "total_active_users",
            "SELECT COUNT(DISTINCT user_name) AS metric_value
        FROM {query_history_table}
        WHERE start_time >= {start_date}
        AND start_time < {end_date}
        AND user_name IS NOT NULL
        {user_filter}",
        ),
        (
            "avg_cost_per_user",
            concat!(
                warehouse_rates!(),
                ",
        user_costs AS (
            SELECT
                qh.user_name,
                ROUND(SUM(",
                query_cost!(),
                "), 2) AS user_cost
            FROM {query_history_table} qh
            JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
            WHERE qh.start_time >= {start_date}
            AND qh.start_time < {end_date}
            AND qh.user_name IS NOT NULL
            AND qh.warehouse_name IS NOT NULL
            {user_filter}
            GROUP BY qh.user_name
        )
        SELECT COALESCE(ROUND(AVG(user_cost), 2), 0) AS metric_value
        FROM user_costs"
            ),
        ),
        (
            "high_cost_users_count",
            concat!(
                warehouse_rates!(),
                ",
        user_costs AS (
            SELECT qh.user_name, SUM(",
                query_cost!(),
                ") AS user_cost
            FROM {query_history_table} qh
            JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
            WHERE qh.start_time >= {start_date}
            AND qh.start_time < {end_date}
            AND qh.user_name IS NOT NULL
            AND qh.warehouse_name IS NOT NULL
            {user_filter}
            GROUP BY qh.user_name
            HAVING SUM(",
                query_cost!(),
                ") > 100
        )
        SELECT COUNT(*) AS metric_value FROM user_costs"
            ),
        ),
        (
            "failed_queries_percentage",
            "WITH query_stats AS (
            SELECT
                COUNT(*) AS total_queries,
                COUNT(CASE WHEN execution_status = 'FAIL' THEN 1 END) AS failed_queries
            FROM {query_history_table}
            WHERE start_time >= {start_date}
            AND start_time < {end_date}
            {user_filter}
        )
        SELECT COALESCE(ROUND((failed_queries * 100.0 / NULLIF(total_queries, 0)), 2), 0) AS metric_value
        FROM query_stats",
        ),
        (
            "avg_query_duration",
            "SELECT COALESCE(ROUND(AVG(total_elapsed_time) / 1000.0, 2), 0) AS metric_value
        FROM {query_history_table}
        WHERE start_time >= {start_date}
        AND start_time < {end_date}
        AND total_elapsed_time > 0
        AND execution_status = 'SUCCESS'
        {user_filter}",
        ),
        (
            "cost_by_user_and_role",
            concat!(
                warehouse_rates!(),
                ",
        user_costs AS (
            SELECT qh.user_name AS name, ROUND(SUM(",
                query_cost!(),
                "), 2) AS cost_usd, 'User' AS type
            FROM {query_history_table} qh
            JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
            WHERE qh.start_time >= {start_date}
            AND qh.start_time < {end_date}
            AND qh.warehouse_name IS NOT NULL
            AND qh.user_name IS NOT NULL
            {user_filter}
            GROUP BY qh.user_name
        ),
        role_costs AS (
            SELECT qh.role_name AS name, ROUND(SUM(",
                query_cost!(),
                "), 2) AS cost_usd, 'Role' AS type
            FROM {query_history_table} qh
            JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
            WHERE qh.start_time >= {start_date}
            AND qh.start_time < {end_date}
            AND qh.warehouse_name IS NOT NULL
            AND qh.role_name IS NOT NULL
            {user_filter}
            GROUP BY qh.role_name
        )
        SELECT name, cost_usd, type FROM user_costs
        UNION ALL
        SELECT name, cost_usd, type FROM role_costs
        ORDER BY cost_usd DESC"
            ),
        ),
        (
            "cost_by_user",
            concat!(
                warehouse_rates!(),
                "
        SELECT
            qh.user_name AS USER_NAME,
            ROUND(SUM(",
                query_cost!(),
                "), 2) AS TOTAL_COST_USD,
            COUNT(DISTINCT qh.query_id) AS QUERY_COUNT,
            ROUND(AVG(qh.total_elapsed_time / 1000.0), 2) AS AVG_DURATION_SEC,
            COUNT(CASE WHEN qh.execution_status = 'FAIL' THEN 1 END) AS FAILED_QUERIES
        FROM {query_history_table} qh
        JOIN warehouse_rates wr ON qh.warehouse_size = wr.size
        WHERE qh.start_time >= {start_date}
        AND qh.start_time < {end_date}
        AND qh.user_name IS NOT NULL
        AND qh.warehouse_name IS NOT NULL
        {user_filter}
        GROUP BY qh.user_name
        ORDER BY TOTAL_COST_USD DESC"
            ),
        ),
        (
            "hourly_activity",
            "SELECT
            user_name AS USER_NAME,
            EXTRACT(HOUR FROM start_time) AS HOUR_OF_DAY,
            COUNT(*) AS TOTAL_QUERIES,
            ROUND(AVG(total_elapsed_time / 1000.0), 2) AS AVG_DURATION_SEC
        FROM {query_history_table}
        WHERE start_time >= {start_date}
        AND start_time < {end_date}
        AND user_name IS NOT NULL
        {user_filter}
        GROUP BY user_name, EXTRACT(HOUR FROM start_time)
        ORDER BY user_name, HOUR_OF_DAY",
        ),
        (
            "login_failures",
            "SELECT
            user_name AS USER_NAME,
            COUNT(*) AS FAILED_LOGINS
        FROM {login_history_table}
        WHERE event_timestamp >= {start_date}
        AND event_timestamp < {end_date}
        AND is_success = 'NO'
        {user_filter}
        GROUP BY user_name
        ORDER BY FAILED_LOGINS DESC",
        ),
        (
            "warehouse_credits",
            "SELECT
            warehouse_name AS WAREHOUSE_NAME,
            ROUND(SUM(credits_used), 2) AS CREDITS_USED
        FROM {warehouse_metering_history_table}
        WHERE start_time >= {start_date}
        AND start_time < {end_date}
        GROUP BY warehouse_name
        ORDER BY CREDITS_USED DESC",
        ),
    ],
};
