//! Command execution.

use crate::{Commands, GroupArgs, PersistentCommands};
use colored::Colorize;
use evstore_client::{
    CatchUpSubscription, Client, EventData, EventReadStatus, ExpectedVersion,
    PersistentSubscriptionSettings, Position, ReadDirection, ResolvedEvent, SliceReadStatus,
    StreamMetadata, StreamPosition, SubscriptionDropped, VolatileSubscription,
};
use serde_json::Value;
use std::time::Duration;

type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Parses `any`, `no-stream`, `exists` or an event number.
pub fn parse_expected_version(s: &str) -> Result<ExpectedVersion, String> {
    match s.to_lowercase().as_str() {
        "any" => Ok(ExpectedVersion::Any),
        "no-stream" | "none" => Ok(ExpectedVersion::NoStream),
        "exists" => Ok(ExpectedVersion::StreamExists),
        other => other
            .parse::<i64>()
            .map(ExpectedVersion::Exact)
            .map_err(|_| format!("invalid expected version '{}'", s)),
    }
}

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> CommandResult<String> {
    match cmd {
        Commands::Subscribe { .. } | Commands::Persistent(PersistentCommands::Connect { .. }) => {
            unreachable!("streaming commands are run by the caller")
        }

        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Append {
            stream,
            event_type,
            data,
            metadata,
            expected_version,
        } => {
            let data = parse_json_arg(&data)?;
            let mut event = EventData::json(event_type, &data)?;
            if let Some(metadata) = metadata {
                event = event.with_json_metadata(&parse_json_arg(&metadata)?)?;
            }
            let result = client
                .append_to_stream(&stream, expected_version, &[event], None)
                .await?;
            Ok(format!(
                "{} to {} (next expected version: {}, position: {})",
                "Appended".green(),
                stream.cyan(),
                result.next_expected_version,
                result.log_position
            ))
        }

        Commands::Read {
            stream,
            from,
            count,
            backward,
            resolve_links,
        } => {
            let (direction, start) = if backward {
                (ReadDirection::Backward, from.unwrap_or(StreamPosition::END))
            } else {
                (ReadDirection::Forward, from.unwrap_or(StreamPosition::START))
            };
            let slice = client
                .read_stream_events(&stream, start, count, direction, resolve_links, None)
                .await?;
            match slice.status {
                SliceReadStatus::StreamNotFound => {
                    return Ok(format!("Stream {} not found", stream.cyan()).yellow().to_string())
                }
                SliceReadStatus::StreamDeleted => {
                    return Ok(format!("Stream {} is deleted", stream.cyan()).red().to_string())
                }
                SliceReadStatus::Success => {}
            }

            let mut output = String::new();
            for event in &slice.events {
                output.push_str(&format_event(event));
                output.push('\n');
            }
            output.push_str(
                &format!(
                    "{} events, next: {}, end of stream: {}",
                    slice.events.len(),
                    slice.next_event_number,
                    slice.is_end_of_stream
                )
                .dimmed()
                .to_string(),
            );
            Ok(output)
        }

        Commands::ReadEvent {
            stream,
            number,
            resolve_links,
        } => {
            let result = client.read_event(&stream, number, resolve_links, None).await?;
            match (result.status, result.event) {
                (EventReadStatus::Success, Some(event)) => Ok(format_event(&event)),
                (EventReadStatus::StreamDeleted, _) => {
                    Ok(format!("Stream {} is deleted", stream.cyan()).red().to_string())
                }
                (EventReadStatus::NoStream, _) => {
                    Ok(format!("Stream {} not found", stream.cyan()).yellow().to_string())
                }
                _ => Ok(format!("Event {} not found in {}", number, stream.cyan())
                    .yellow()
                    .to_string()),
            }
        }

        Commands::ReadAll {
            commit,
            prepare,
            count,
            backward,
            resolve_links,
        } => {
            let position = match commit {
                Some(commit) => Position::new(commit, prepare.unwrap_or(commit)),
                None if backward => Position::END,
                None => Position::START,
            };
            let slice = if backward {
                client
                    .read_all_events_backward(position, count, resolve_links, None)
                    .await?
            } else {
                client
                    .read_all_events_forward(position, count, resolve_links, None)
                    .await?
            };

            let mut output = String::new();
            for event in &slice.events {
                output.push_str(&format_event(event));
                output.push('\n');
            }
            output.push_str(
                &format!(
                    "{} events, next position: {}",
                    slice.events.len(),
                    slice.next_position
                )
                .dimmed()
                .to_string(),
            );
            Ok(output)
        }

        Commands::Delete {
            stream,
            expected_version,
            hard,
        } => {
            let result = client
                .delete_stream(&stream, expected_version, hard, None)
                .await?;
            let kind = if hard { "Hard deleted" } else { "Deleted" };
            Ok(format!(
                "{} {} (position: {})",
                kind.green(),
                stream.cyan(),
                result.log_position
            ))
        }

        Commands::Persistent(PersistentCommands::Create(args)) => {
            let settings = group_settings(&args)?;
            client
                .create_persistent_subscription(&args.stream, &args.group, settings, None)
                .await?;
            Ok(format!(
                "{} group {} on {}",
                "Created".green(),
                args.group.cyan(),
                args.stream.cyan()
            ))
        }

        Commands::Persistent(PersistentCommands::Update(args)) => {
            let settings = group_settings(&args)?;
            client
                .update_persistent_subscription(&args.stream, &args.group, settings, None)
                .await?;
            Ok(format!(
                "{} group {} on {}",
                "Updated".green(),
                args.group.cyan(),
                args.stream.cyan()
            ))
        }

        Commands::Persistent(PersistentCommands::Delete { stream, group }) => {
            client
                .delete_persistent_subscription(&stream, &group, None)
                .await?;
            Ok(format!(
                "{} group {} on {}",
                "Deleted".green(),
                group.cyan(),
                stream.cyan()
            ))
        }

        Commands::GetMetadata { stream } => {
            let result = client.get_stream_metadata(&stream, None).await?;
            if result.is_stream_deleted {
                return Ok(format!("Stream {} is deleted", stream.cyan()).red().to_string());
            }
            Ok(format!(
                "{}\n{}",
                format!(
                    "Metadata of {} (metastream version {})",
                    stream.cyan(),
                    result.metastream_version
                )
                .bold(),
                serde_json::to_string_pretty(&result.metadata)?
            ))
        }

        Commands::SetMetadata {
            stream,
            metadata,
            expected_version,
        } => {
            let metadata: StreamMetadata = serde_json::from_value(parse_json_arg(&metadata)?)?;
            let result = client
                .set_stream_metadata(&stream, expected_version, &metadata, None)
                .await?;
            Ok(format!(
                "{} metadata of {} (metastream version {})",
                "Set".green(),
                stream.cyan(),
                result.next_expected_version
            ))
        }
    }
}

fn group_settings(args: &GroupArgs) -> CommandResult<PersistentSubscriptionSettings> {
    let mut settings = PersistentSubscriptionSettings::new().resolve_link_tos(args.resolve_links);
    if args.from_beginning {
        settings = settings.start_from_beginning();
    }
    if let Some(retries) = args.max_retries {
        settings = settings.with_max_retry_count(retries);
    }
    if let Some(secs) = args.message_timeout {
        settings = settings.with_message_timeout(Duration::from_secs(secs));
    }
    if let Some(strategy) = &args.strategy {
        settings = settings.with_consumer_strategy(strategy.parse()?);
    }
    Ok(settings)
}

/// Streams a volatile or catch-up subscription until Ctrl+C.
pub async fn subscribe(
    client: &Client,
    stream: Option<String>,
    from: Option<i64>,
    resolve_links: bool,
) -> CommandResult<()> {
    let label = stream.clone().unwrap_or_else(|| "$all".to_string());

    match (stream, from) {
        (Some(stream), Some(from)) => {
            let checkpoint = (from >= 0).then_some(from);
            let mut settings = client.catch_up_settings();
            settings.resolve_link_tos = resolve_links;
            let subscription = client.subscribe_to_stream_from(&stream, checkpoint, settings, None);
            eprintln!(
                "{} {} from {}",
                "Catching up".green(),
                label.cyan(),
                checkpoint.map_or("the start".to_string(), |n| format!("event {}", n + 1))
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
            follow_catch_up(subscription).await
        }
        (None, Some(_)) => Err("--from needs a stream; $all cannot be replayed".into()),
        (stream, None) => {
            let subscription = match stream {
                Some(stream) => client.subscribe_to_stream(&stream, resolve_links, None).await?,
                None => client.subscribe_to_all(resolve_links, None).await?,
            };
            eprintln!(
                "{} {} (last event: {}, commit position: {})",
                "Subscribed to".green(),
                label.cyan(),
                subscription
                    .last_event_number()
                    .map_or("-".to_string(), |n| n.to_string()),
                subscription.last_commit_position()
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
            follow_volatile(subscription).await
        }
    }
}

async fn follow_volatile(mut subscription: VolatileSubscription) -> CommandResult<()> {
    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => println!("{}", format_event(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Unsubscribing...".dimmed());
                subscription.unsubscribe().await?;
                break;
            }
        }
    }
    report_drop(subscription.dropped().await);
    Ok(())
}

async fn follow_catch_up(mut subscription: CatchUpSubscription) -> CommandResult<()> {
    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => println!("{}", format_event(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                subscription.stop();
                break;
            }
        }
    }
    report_drop(subscription.dropped().await);
    Ok(())
}

/// Consumes a persistent subscription, acknowledging every event.
pub async fn consume_persistent(
    client: &Client,
    stream: &str,
    group: &str,
    buffer_size: i32,
) -> CommandResult<()> {
    let mut subscription = client
        .connect_to_persistent_subscription(stream, group, buffer_size, None)
        .await?;
    eprintln!(
        "{} {} ({})",
        "Connected to".green(),
        subscription.subscription_id().cyan(),
        "auto-ack".dimmed()
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => {
                    let retries = if event.retry_count > 0 {
                        format!(" (retry {})", event.retry_count).yellow().to_string()
                    } else {
                        String::new()
                    };
                    println!("{}{}", format_event(&event.event), retries);
                    event.ack().await?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Disconnecting...".dimmed());
                subscription.stop().await?;
                break;
            }
        }
    }
    report_drop(subscription.dropped().await);
    Ok(())
}

fn report_drop(dropped: SubscriptionDropped) {
    match dropped.error {
        Some(error) => eprintln!(
            "{}: {} ({})",
            "Subscription dropped".red(),
            dropped.reason,
            error
        ),
        None => eprintln!("{}: {}", "Subscription dropped".dimmed(), dropped.reason),
    }
}

fn format_event(event: &ResolvedEvent) -> String {
    let Some(record) = event.original_event() else {
        return "<unresolved link>".dimmed().to_string();
    };

    let mut line = format!(
        "{} {}@{}",
        record.event_type.yellow(),
        record.event_number,
        record.stream_id.cyan()
    );
    if let Some(target) = event.link.as_ref().and(event.event.as_ref()) {
        line.push_str(&format!(" -> {}@{}", target.event_number, target.stream_id));
    }
    if let Some(created) = record.created {
        line.push_str(&format!(" {}", created.to_rfc3339().dimmed()));
    }

    let payload = event.event.as_ref().unwrap_or(record);
    if payload.is_json {
        match serde_json::from_slice::<Value>(&payload.data) {
            Ok(value) => line.push_str(&format!(" {}", value)),
            Err(_) => line.push_str(&format!(" <{} bytes, invalid JSON>", payload.data.len())),
        }
    } else {
        line.push_str(&format!(" <{} bytes>", payload.data.len()));
    }
    line
}

fn parse_json_arg(arg: &str) -> CommandResult<Value> {
    let json_str = if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        arg.to_string()
    };
    Ok(serde_json::from_str(&json_str)?)
}
