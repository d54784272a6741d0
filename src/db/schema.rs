use rusqlite::Connection;

/// Initialize the main database schema (workspaces, links, customers,
/// programs, commissions, webhooks, idempotency keys).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Workspaces (tenants - aggregate usage counters + webhook flag)
        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            plan TEXT NOT NULL DEFAULT 'free',
            notify_email TEXT,
            usage INTEGER NOT NULL DEFAULT 0,
            sales_usage INTEGER NOT NULL DEFAULT 0,
            webhook_enabled INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Short links (conversion counters + optional affiliate attribution)
        CREATE TABLE IF NOT EXISTS links (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            domain TEXT NOT NULL,
            key TEXT NOT NULL,
            url TEXT NOT NULL,
            clicks INTEGER NOT NULL DEFAULT 0,
            leads INTEGER NOT NULL DEFAULT 0,
            sales INTEGER NOT NULL DEFAULT 0,
            sale_amount INTEGER NOT NULL DEFAULT 0,
            program_id TEXT,
            partner_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(domain, key)
        );
        CREATE INDEX IF NOT EXISTS idx_links_workspace ON links(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_links_program ON links(program_id) WHERE program_id IS NOT NULL;

        -- Customers (two-sided identity: workspace external_id + provider customer id)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            external_id TEXT,
            project_connect_id TEXT,
            stripe_customer_id TEXT UNIQUE,
            name TEXT,
            email TEXT,
            link_id TEXT REFERENCES links(id) ON DELETE SET NULL,
            click_id TEXT,
            country TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(project_connect_id, external_id)
        );
        CREATE INDEX IF NOT EXISTS idx_customers_workspace ON customers(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_customers_external ON customers(project_connect_id, external_id);

        -- Partner programs (default reward rules)
        CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            reward_type TEXT NOT NULL CHECK (reward_type IN ('percentage', 'flat')),
            reward_amount INTEGER NOT NULL,
            reward_event TEXT NOT NULL CHECK (reward_event IN ('lead', 'sale')),
            created_at INTEGER NOT NULL
        );

        -- Program enrollments (partner <-> program via a specific link)
        CREATE TABLE IF NOT EXISTS program_enrollments (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            partner_id TEXT NOT NULL,
            link_id TEXT NOT NULL REFERENCES links(id) ON DELETE CASCADE,
            partner_email TEXT,
            commission_amount INTEGER,
            created_at INTEGER NOT NULL,

            UNIQUE(program_id, partner_id)
        );
        CREATE INDEX IF NOT EXISTS idx_enrollments_link ON program_enrollments(link_id);

        -- Commissions (one per qualifying lead/sale event; event_id is the dedupe key)
        CREATE TABLE IF NOT EXISTS commissions (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL CHECK (event_type IN ('lead', 'sale')),
            program_id TEXT NOT NULL REFERENCES programs(id),
            partner_id TEXT NOT NULL,
            link_id TEXT NOT NULL REFERENCES links(id),
            customer_id TEXT NOT NULL REFERENCES customers(id),
            event_id TEXT NOT NULL UNIQUE,
            invoice_id TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            amount INTEGER NOT NULL DEFAULT 0,
            currency TEXT NOT NULL DEFAULT 'usd',
            earnings INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_commissions_partner ON commissions(partner_id, program_id);
        CREATE INDEX IF NOT EXISTS idx_commissions_invoice ON commissions(invoice_id) WHERE invoice_id IS NOT NULL;

        -- Outbound webhook subscribers (health counters live here)
        CREATE TABLE IF NOT EXISTS webhooks (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            triggers TEXT NOT NULL DEFAULT '[]',  -- JSON array of event names
            disabled_at INTEGER,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_failed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhooks_workspace ON webhooks(workspace_id);

        -- Link scoping for link-level webhooks
        CREATE TABLE IF NOT EXISTS webhook_links (
            webhook_id TEXT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
            link_id TEXT NOT NULL REFERENCES links(id) ON DELETE CASCADE,

            PRIMARY KEY (webhook_id, link_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_links_link ON webhook_links(link_id);

        -- Idempotency keys (SETNX-with-TTL semantics, see idempotency module)
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            key TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        "#,
    )
}

/// Initialize the time-series events database schema (separate file to
/// isolate append-only analytics growth from relational data).
pub fn init_events_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Click events (append-only)
        CREATE TABLE IF NOT EXISTS click_events (
            event_id TEXT PRIMARY KEY,
            link_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            url TEXT,
            country TEXT,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_click_events_link ON click_events(link_id, timestamp);

        -- Lead events (append-only)
        CREATE TABLE IF NOT EXISTS lead_events (
            event_id TEXT PRIMARY KEY,
            event_name TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            link_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            click_id TEXT,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lead_events_customer ON lead_events(customer_id, timestamp);

        -- Sale events (append-only)
        CREATE TABLE IF NOT EXISTS sale_events (
            event_id TEXT PRIMARY KEY,
            event_name TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            link_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            invoice_id TEXT,
            payment_processor TEXT NOT NULL,
            metadata TEXT,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sale_events_customer ON sale_events(customer_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_sale_events_invoice ON sale_events(invoice_id) WHERE invoice_id IS NOT NULL;
        "#,
    )
}
