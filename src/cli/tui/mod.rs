//! Interactive scene editor.
//!
//! Optionally follows a render/staging job until it completes, then shows the
//! video's scenes for drag-and-drop reordering.

mod app;
mod input;
mod ui;

use std::io::{self, stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event, execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::context::AppContext;
use app::EditorApp;

/// How long to wait for input before applying background results.
const TICK: Duration = Duration::from_millis(200);

/// Run the editor for `video_id`, first waiting on `job_id` when given.
pub async fn run(ctx: AppContext, video_id: String, job_id: Option<String>) -> Result<()> {
    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = EditorApp::new(ctx, video_id, job_id);
    let result = run_app(&mut terminal, &mut app).await;
    app.teardown();

    // Restore terminal
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut EditorApp,
) -> Result<()> {
    app.init().await?;

    loop {
        terminal.draw(|frame| ui::render(frame, app))?;

        if event::poll(TICK)? {
            let event = event::read()?;
            if let Some(action) = input::handle_event(event) {
                app.handle_action(action).await;
            }
        }
        app.tick().await;

        if !app.running {
            break;
        }
    }

    Ok(())
}
