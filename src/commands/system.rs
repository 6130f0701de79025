use colored::Colorize;

pub enum SystemAction {
    Continue,
    Exit,
}

pub fn handle_command(input: &str) -> Result<SystemAction, String> {
    match input.to_lowercase().as_str() {
        "help" => {
            print_help();
            Ok(SystemAction::Continue)
        }
        "exit" | "quit" => {
            println!("👋 Goodbye!");
            Ok(SystemAction::Exit)
        }
        _ => Err("Unknown system command. Type /help for available commands.".to_string()),
    }
}

fn print_help() {
    println!("\n🧠 Memory Assistant:");
    println!("  Just type what you want done with your memory");
    println!("  Lines starting with / are local commands");
    println!("  Examples:");
    println!("    - remember the file I uploaded");
    println!("    - what is my favorite color?");
    println!("    - my favorite color is now green");
    println!("    - forget my favorite color");
    println!();

    println!("📄 Upload Commands:");
    println!("  /upload <file>  - Attach a .txt or .pdf file to your next prompt");
    println!();

    println!("🗂️ Memory Commands:");
    println!("  /memory         - List stored memory records");
    println!("  /forget <id>    - Permanently remove a record");
    println!();

    println!("🔄 Model Commands:");
    println!("  /model <name>   - Switch model ({} or {})", "llama3".cyan(), "gpt4".cyan());
    println!("  /key <api-key>  - Set the API key for the current model");
    println!();

    println!("⚙️ System Commands:");
    println!("  /reset  - Clear the conversation");
    println!("  /help   - Show this help menu");
    println!("  /exit   - Exit the program");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_and_quit_stop_the_loop() {
        assert!(matches!(handle_command("exit"), Ok(SystemAction::Exit)));
        assert!(matches!(handle_command("QUIT"), Ok(SystemAction::Exit)));
        assert!(matches!(handle_command("help"), Ok(SystemAction::Continue)));
        assert!(handle_command("reboot").is_err());
    }
}
