//! Interactive shell for a personal assistant backed by a remote
//! assistants service: provisions the assistant, keeps one persistent
//! conversation thread, and answers its tool calls locally.

mod agent;
mod cli;
mod config;
mod error;
mod files;
mod memory_db;
mod msg;
mod openai;
mod registry;
mod run;
mod tool_args;
mod tool_defs;
mod tool_exec;
mod util;

#[cfg(test)]
mod testsrv;

use std::io::{BufRead, Write};

use clap::Parser;

use crate::agent::{Assistant, Conv};
use crate::cli::{Cli, Cmd};

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let mut asst = Assistant::init_from_dir(&args.dir, args.recreate)?;
    let mut conv = asst.load_or_create_conv(args.recreate)?;
    println!("{}", cli::welcome_message(&asst.config.name));

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }
        match Cmd::from_input(&line) {
            Cmd::Quit => break,
            Cmd::Help => println!("{}", cli::help_menu()),
            Cmd::Clear => cli::clear_screen(),
            Cmd::RefreshAll => match Assistant::init_from_dir(&args.dir, true) {
                Ok(fresh) => {
                    asst = fresh;
                    conv = asst.load_or_create_conv(true)?;
                    println!("{}", cli::green_text("assistant and conversation recreated"));
                }
                Err(e) => eprintln!("{}", cli::red_text(&format!("refresh failed: {e}"))),
            },
            Cmd::RefreshConv => match asst.load_or_create_conv(true) {
                Ok(fresh) => {
                    conv = fresh;
                    println!("{}", cli::green_text("new conversation started"));
                }
                Err(e) => eprintln!("{}", cli::red_text(&format!("refresh failed: {e}"))),
            },
            Cmd::RefreshInst => match asst.upload_instructions() {
                Ok(()) => println!("{}", cli::green_text("instructions refreshed")),
                Err(e) => eprintln!("{}", cli::red_text(&format!("refresh failed: {e}"))),
            },
            Cmd::RefreshFiles => match asst.upload_files(true) {
                Ok(()) => println!("{}", cli::green_text("context files refreshed")),
                Err(e) => eprintln!("{}", cli::red_text(&format!("refresh failed: {e}"))),
            },
            Cmd::Chat(message) => chat_turn(&asst, &conv, &message),
        }
    }
    Ok(())
}

fn chat_turn(asst: &Assistant, conv: &Conv, message: &str) {
    match asst.chat(conv, message) {
        Ok(reply) => {
            println!("{}", cli::asst_msg(&reply.text));
            for (i, payload) in reply.attachments.iter().enumerate() {
                let dst = asst.paths.data_dir.join(format!("attachment-{i}.bin"));
                match std::fs::write(&dst, payload) {
                    Ok(()) => println!(
                        "{}",
                        cli::green_text(&format!("saved attachment to {}", dst.display()))
                    ),
                    Err(e) => eprintln!(
                        "{}",
                        cli::red_text(&format!("could not save attachment {i}: {e}"))
                    ),
                }
            }
        }
        Err(e) => eprintln!("{}", cli::red_text(&format!("turn failed: {e}"))),
    }
}
