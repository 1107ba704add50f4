//! A terminal chat with the medical assistant.

#[macro_use]
extern crate tracing;

mod commands;
mod render;

use std::env;
use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use medchat::SessionBuilder;
use medchat::core::SessionEvent;
use medchat::image::load_image;
use medchat_http_backend::HttpConfigBuilder;
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::sleep;

use commands::{HELP, Input, read_line};
use render::{BAR_CHAR, Renderer};

const PROGRESS_TEMPLATE: &str = "{spinner} {wide_msg}";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = HttpConfigBuilder::new();
    if let Ok(base_url) = env::var("MEDCHAT_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    let streaming = match env::var("MEDCHAT_STREAM") {
        Ok(value) => match commands::parse_switch(&value) {
            Some(enabled) => enabled,
            None => {
                eprintln!("MEDCHAT_STREAM must be `on` or `off`");
                return ExitCode::FAILURE;
            }
        },
        Err(_) => true,
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_http_config(config.build())
        .with_streaming(streaming)
        .on_event(move |event| {
            event_tx.send(event).ok();
        });
    if let Some(data_dir) = env::var_os("MEDCHAT_DATA_DIR") {
        builder = builder.with_data_dir(data_dir);
    }
    let session = builder.build();

    let Ok(progress_style) = ProgressStyle::with_template(PROGRESS_TEMPLATE)
    else {
        eprintln!("invalid progress template");
        return ExitCode::FAILURE;
    };
    let progress_style = progress_style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut renderer = Renderer::default();
    let mut stdin = BufReader::new(io::stdin()).lines();
    println!("Type a message, or /help for commands.");

    // Show the welcome or the restored conversation first.
    session.wait_idle().await;
    drain_events(&mut event_rx, &mut renderer);

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = select! {
            line = read_line(&mut stdin) => line,
            _ = signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match commands::parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                continue;
            }
            Input::Invalid(command) => {
                eprintln!("invalid command `{command}`, try /help");
                continue;
            }
            Input::AttachImage(path) => {
                match load_image(path).await {
                    Ok(image) => {
                        session.attach_image(image);
                        println!("{}", "image attached".dimmed());
                    }
                    Err(err) => eprintln!("{err}"),
                }
                continue;
            }
            Input::ClearImage => {
                session.clear_image();
                println!("{}", "image removed".dimmed());
                continue;
            }
            Input::Stream(enabled) => {
                session.set_streaming(enabled);
                let state = if enabled { "on" } else { "off" };
                println!("{}", format!("streaming is {state}").dimmed());
                continue;
            }
            Input::History => session.reload_history(),
            Input::New => session.new_conversation(),
            Input::Message(text) => session.send_message(text),
        }

        let idle = session.wait_idle();
        tokio::pin!(idle);
        let mut progress_bar = None;

        loop {
            // The spinner would garble a reply being streamed.
            if !renderer.is_streaming() {
                progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(progress_style.clone());
                        progress_bar.set_message("🩺 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = &mut idle => {
                    finish_progress(&mut progress_bar);
                    drain_events(&mut event_rx, &mut renderer);
                    break;
                }
                _ = signal::ctrl_c() => {
                    debug!("cancelling the pending request");
                    session.cancel();
                    continue;
                }
                _ = sleep => {
                    continue;
                }
            };

            // Finish the progress bar before printing anything else.
            finish_progress(&mut progress_bar);
            print_event(&mut renderer, event);
        }
    }

    println!("{}👋 Take care.", BAR_CHAR.bright_cyan());
    ExitCode::SUCCESS
}

fn finish_progress(progress_bar: &mut Option<ProgressBar>) {
    if let Some(progress_bar) = progress_bar.take() {
        progress_bar.finish_and_clear();
    }
}

fn drain_events(
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    renderer: &mut Renderer,
) {
    while let Ok(event) = event_rx.try_recv() {
        print_event(renderer, event);
    }
}

fn print_event(renderer: &mut Renderer, event: SessionEvent) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = renderer.render(&mut stdout, event) {
        error!("error writing output: {}", err);
    }
}
