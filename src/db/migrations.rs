use anyhow::Context;
use rusqlite::Connection;

/// Ordered migrations, embedded so the binary is self-contained. Applied
/// ones are recorded in `_migrations` and skipped on the next start.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial.sql",
    "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL DEFAULT 'guest',
        api_token TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS accommodations (
        id TEXT PRIMARY KEY,
        staff_id TEXT NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        contact_email TEXT,
        is_verified INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        accommodation_id TEXT NOT NULL REFERENCES accommodations(id),
        name TEXT NOT NULL,
        capacity INTEGER NOT NULL CHECK (capacity > 0),
        total_rooms INTEGER NOT NULL CHECK (total_rooms >= 0),
        base_price TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS extra_services (
        id TEXT PRIMARY KEY,
        accommodation_id TEXT NOT NULL REFERENCES accommodations(id),
        name TEXT NOT NULL,
        price TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS bookings (
        id TEXT PRIMARY KEY,
        booking_reference TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(id),
        accommodation_id TEXT NOT NULL REFERENCES accommodations(id),
        room_id TEXT NOT NULL REFERENCES rooms(id),
        check_in_date TEXT NOT NULL,
        check_out_date TEXT NOT NULL CHECK (check_out_date > check_in_date),
        number_of_rooms INTEGER NOT NULL CHECK (number_of_rooms > 0),
        number_of_guests INTEGER NOT NULL CHECK (number_of_guests > 0),
        total_nights INTEGER NOT NULL,
        room_subtotal TEXT NOT NULL,
        services_subtotal TEXT NOT NULL,
        total_amount TEXT NOT NULL,
        booking_status TEXT NOT NULL DEFAULT 'pending',
        payment_status TEXT NOT NULL DEFAULT 'unpaid',
        payment_method TEXT,
        special_requests TEXT,
        cancellation_reason TEXT,
        cancelled_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_bookings_room_dates
        ON bookings(room_id, check_in_date, check_out_date);
    CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id);

    CREATE TABLE IF NOT EXISTS booking_services (
        id TEXT PRIMARY KEY,
        booking_id TEXT NOT NULL REFERENCES bookings(id),
        service_id TEXT NOT NULL REFERENCES extra_services(id),
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        price TEXT NOT NULL,
        subtotal TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        booking_id TEXT NOT NULL REFERENCES bookings(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        transaction_id TEXT NOT NULL UNIQUE,
        transaction_type TEXT NOT NULL,
        amount TEXT NOT NULL,
        status TEXT NOT NULL,
        payment_method TEXT,
        payment_response TEXT,
        refund_id TEXT,
        refund_amount TEXT,
        refunded_at TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_booking ON transactions(booking_id);
    ",
)];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
