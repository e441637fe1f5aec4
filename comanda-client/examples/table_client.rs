//! Interactive Table Client Example
//!
//! Demonstrates the offline-first ordering flow end to end:
//! 1. Open the durable store and resume (or create) a table session
//! 2. Browse the menu mirror kept fresh by the realtime reconciler
//! 3. Build a cart and queue orders through the durable outbox
//! 4. Watch sync progress and order-status notifications
//!
//! Configuration comes from COMANDA_API_URL, COMANDA_EVENTS_ADDR and
//! COMANDA_DATA_DIR (see `ClientConfig::from_env`). Without a backend the
//! client still works: orders queue locally and sync once one appears.
//!
//! Run: cargo run --example table_client

use std::io::{self, Write};

use comanda_client::{ClientConfig, ComandaClient, OutboxEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🍽️  Comanda Table Client");
    println!("========================\n");

    let table_number: u32 = get_input_with_default("Table number", "12")
        .parse()
        .unwrap_or(12);

    let config = ClientConfig::from_env();
    println!("\nAPI URL:   {}", config.api_base_url);
    println!("Events:    {}", config.events_addr);
    println!("Data dir:  {}", config.data_dir.display());

    let mut client = ComandaClient::start(config, table_number).await?;
    let session = client.session().clone();
    println!(
        "\n✅ Session {} ready on table {}.",
        session.session_id, session.table_number
    );

    // Print push notifications as they arrive
    if let Some(mut notifications) = client.take_notifications() {
        tokio::spawn(async move {
            while let Some(note) = notifications.recv().await {
                println!("\n🔔 {}: {}", note.title, note.body);
                print!("> ");
                let _ = io::stdout().flush();
            }
        });
    }

    // Mirror outbox progress on the console
    let mut outbox_events = client.outbox().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = outbox_events.recv().await {
            match event {
                OutboxEvent::Queued { local_id } => {
                    println!("\n📤 Order {local_id} queued for sync");
                }
                OutboxEvent::Synced { local_id, order_id } => {
                    println!("\n✅ Order {local_id} synced as {order_id}");
                }
                OutboxEvent::RetryScheduled {
                    local_id,
                    retry_count,
                    ..
                } => {
                    println!("\n🔁 Order {local_id} sync failed, retry #{retry_count} scheduled");
                }
                OutboxEvent::TerminallyFailed { local_id, error } => {
                    println!("\n❌ Order {local_id} gave up: {error}");
                }
                OutboxEvent::Discarded { local_id } => {
                    println!("\n🗑️  Order {local_id} discarded");
                }
            }
            print!("> ");
            let _ = io::stdout().flush();
        }
    });

    interactive_loop(client).await
}

async fn interactive_loop(client: ComandaClient) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let status = if client.connectivity().is_online() {
            "🟢 online"
        } else {
            "🔴 offline"
        };
        println!("\n━━━━━━━━━━ {status} ━━━━━━━━━━");
        print_menu();
        io::stdout().flush()?;

        let choice = get_input("Enter choice (0-6): ");

        match choice.as_str() {
            "0" => {
                println!("\n👋 Goodbye!");
                break;
            }
            "1" => {
                let items = client.menu().list();
                if items.is_empty() {
                    println!("📭 Menu is empty (no cached copy and no backend yet)");
                    continue;
                }
                let mut last_category = String::new();
                for item in items {
                    if item.category != last_category {
                        println!("\n── {} ──", item.category);
                        last_category = item.category.clone();
                    }
                    let marker = if item.is_available { " " } else { "✗" };
                    println!(
                        "{} {:<10} {:<28} {:>7.2} €",
                        marker, item.id, item.name, item.price
                    );
                }
            }
            "2" => {
                let item_id = get_input("Item id: ");
                let item = match client.menu().get(&item_id) {
                    Some(item) => item,
                    None => {
                        println!("❌ Unknown item id");
                        continue;
                    }
                };
                let quantity = get_input("Quantity: ").parse::<u32>().unwrap_or(1);
                let instructions = get_input("Special instructions (enter for none): ");

                match client.cart().add_item(&item, quantity, &instructions) {
                    Ok(_) => {
                        let totals = client.cart().totals();
                        println!(
                            "✅ {} × {} added ({} items, {:.2} € so far)",
                            quantity, item.name, totals.item_count, totals.subtotal
                        );
                    }
                    Err(e) => println!("❌ {e}"),
                }
            }
            "3" => {
                let lines = client.cart().lines();
                if lines.is_empty() {
                    println!("🛒 Cart is empty");
                    continue;
                }
                for line in &lines {
                    let note = if line.special_instructions.is_empty() {
                        String::new()
                    } else {
                        format!("  ({})", line.special_instructions)
                    };
                    println!(
                        "  {} × {:<28} {:>7.2} €{}",
                        line.quantity,
                        line.name,
                        line.unit_price * f64::from(line.quantity),
                        note
                    );
                }
                let totals = client.cart().totals();
                println!(
                    "  Subtotal {:.2} € — about {} min in the kitchen",
                    totals.subtotal, totals.estimated_prep_minutes
                );
            }
            "4" => {
                let instructions = get_input("Order instructions (enter for none): ");
                match client.checkout(&instructions).await {
                    Ok(local_id) => {
                        println!("📤 Order queued as {local_id}; it syncs when the backend is up");
                    }
                    Err(e) => println!("❌ Checkout failed: {e}"),
                }
            }
            "5" => match client.outbox().pending() {
                Ok(pending) if pending.is_empty() => println!("📭 Outbox is empty"),
                Ok(pending) => {
                    for order in pending {
                        println!(
                            "  {} [{:?}] retries={} total={:.2} €",
                            order.local_id, order.status, order.retry_count, order.total_amount
                        );
                    }
                }
                Err(e) => println!("❌ {e}"),
            },
            "6" => {
                let orders = client.orders().list();
                if orders.is_empty() {
                    println!("📭 No orders for this session yet");
                    continue;
                }
                for order in orders {
                    println!(
                        "  {} [{}] {:.2} € — {} items",
                        order.id,
                        order.status,
                        order.total_amount,
                        order.items.len()
                    );
                }
            }
            _ => println!("❌ Invalid choice"),
        }
    }

    client.shutdown().await;
    Ok(())
}

fn print_menu() {
    println!("1. Browse menu");
    println!("2. Add to cart");
    println!("3. View cart");
    println!("4. Checkout");
    println!("5. Pending sync queue");
    println!("6. Session orders");
    println!("0. Exit");
}

fn get_input(prompt: &str) -> String {
    print!("{}", prompt);
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    input.trim().to_string()
}

fn get_input_with_default(prompt: &str, default: &str) -> String {
    print!("{} [{}]: ", prompt, default);
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    let input = input.trim();
    if input.is_empty() {
        default.to_string()
    } else {
        input.to_string()
    }
}
