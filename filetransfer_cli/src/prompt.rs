use console::{Term, style};
use dialoguer::Input;
use dialoguer::theme::ColorfulTheme;
use filetransfer_core::{PhraseConfirmer, VerificationPhrase, parse_confirmation};
use std::io::{self, BufRead, IsTerminal};

const PROMPT: &str = "Continue [Y/n]?";

/// Shows the phrase on stderr and asks the operator on stdin.
pub struct TerminalConfirmer;

impl PhraseConfirmer for TerminalConfirmer {
    fn confirm(&self, phrase: &VerificationPhrase) -> io::Result<bool> {
        let term = Term::stderr();
        term.write_line(&format!(
            "{} Verification phrase: {}",
            style("[?]").bold().yellow(),
            style(phrase).bold().cyan()
        ))?;
        term.write_line("    Check that the other machine shows exactly the same words.")?;

        let answer = if io::stdin().is_terminal() {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(PROMPT)
                .allow_empty(true)
                .interact_text()
                .map_err(io::Error::other)?
        } else {
            term.write_str(&format!("{} ", PROMPT))?;
            read_answer(&mut io::stdin().lock())?
        };
        Ok(parse_confirmation(&answer))
    }
}

/// One line from a non-interactive stdin. End of input is not an answer.
fn read_answer(input: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before the phrase was confirmed",
        ));
    }
    Ok(line)
}
