//! Writer/reviewer copywriting console: a copywriter proposes ad copy, a
//! project manager critiques it, and the loop runs until the manager
//! approves or the iteration cap is hit.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use agent_chat_rs::{
    ChatEvent, EvaluatorSelection, EvaluatorTermination, GroupChat, OpenAiModel, Participant,
    TurnOutcome,
};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

const REVIEWER_NAME: &str = "ProjectManager";
const REVIEWER_INSTRUCTIONS: &str = "\
You are a project manager who has opinions about copywriting born of a love for David Ogilvy.
The goal is to determine if the given copy is acceptable to print.
If so, state that it is approved.
If not, provide insight on how to refine suggested copy without examples.";

const WRITER_NAME: &str = "Copywriter";
const WRITER_INSTRUCTIONS: &str = "\
You are a copywriter with ten years of experience and are known for brevity and a dry humor.
The goal is to refine and decide on the single best copy as an expert in the field.
Only provide a single proposal per response.
Never delimit the response with quotation marks.
You're laser focused on the goal at hand.
Don't waste time with chit chat.
Consider suggestions when refining an idea.";

const TERMINATION_PROMPT: &str = "\
Determine if the copy has been approved. If so, respond with a single word: yes

History:
{{$history}}";

fn selection_prompt() -> String {
    format!(
        "\
Determine which participant takes the next turn in a conversation based on the most recent participant.
State only the name of the participant to take the next turn.
No participant should take more than one turn in a row.

Choose only from these participants:
- {REVIEWER_NAME}
- {WRITER_NAME}

Always follow these rules when selecting the next participant:
- After {WRITER_NAME}, it is {REVIEWER_NAME}'s turn.
- After {REVIEWER_NAME}, it is {WRITER_NAME}'s turn.

History:
{{{{$history}}}}"
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model_name = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let model = Arc::new(OpenAiModel::from_env(model_name)?);

    let mut chat = GroupChat::builder()
        .participant(Participant::new(
            WRITER_NAME,
            WRITER_INSTRUCTIONS,
            model.clone(),
        ))
        .participant(Participant::new(
            REVIEWER_NAME,
            REVIEWER_INSTRUCTIONS,
            model.clone(),
        ))
        .selection(EvaluatorSelection::new(
            model.clone(),
            selection_prompt(),
            WRITER_NAME,
        ))
        .termination(EvaluatorTermination::new(
            model.clone(),
            TERMINATION_PROMPT,
            [REVIEWER_NAME],
        ))
        .initial_participant(WRITER_NAME)
        .max_iterations(10)
        .reducer_window(1)
        .build()?;

    let stdin = io::stdin();
    loop {
        println!("Hi, I'm your project manager today. What product do you have in mind advertising?");
        print!("User: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        if input.trim().is_empty() {
            break;
        }

        let stream = chat.invoke_stream(input.trim().to_string());
        futures_util::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatEvent::SpeakerChange { name }) => {
                    println!();
                    print!("{name}: ");
                    io::stdout().flush()?;
                }
                Ok(ChatEvent::Fragment { content, .. }) => {
                    // Pace the output so streaming is visible.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    print!("{content}");
                    io::stdout().flush()?;
                }
                Ok(ChatEvent::MessageComplete { .. }) => {}
                Ok(ChatEvent::TurnComplete {
                    outcome,
                    iterations,
                }) => {
                    println!();
                    match outcome {
                        TurnOutcome::Approved => {
                            println!("[copy approved after {iterations} turns]")
                        }
                        TurnOutcome::IterationCap => {
                            println!("[stopped at the {iterations}-turn cap without approval]")
                        }
                        TurnOutcome::EvaluatorFailure => {
                            println!("[turn cut short after {iterations} turns: evaluator failed]")
                        }
                    }
                }
                Err(err) => {
                    println!();
                    eprintln!("turn aborted: {err}");
                    break;
                }
            }
        }

        println!();
    }

    Ok(())
}
