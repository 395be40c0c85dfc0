use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use beacon_core::paths::BeaconPaths;
use crossterm::event::{Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, terminal};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::core::{reduce, Action, Effect, Model, Msg, Settings};
use super::scheduler::Scheduler;
use super::view;
use crate::session_store::SessionStore;
use crate::transport::{HttpTransport, Transport};

const INPUT_POLL: Duration = Duration::from_millis(50);
const TICK: Duration = Duration::from_millis(200);

/// Raw mode plus alternate screen for as long as it lives.
struct RawTerminal;

impl RawTerminal {
    fn enter() -> Result<(Self, Terminal<CrosstermBackend<Stdout>>)> {
        enable_raw_mode().context("enable raw mode")?;
        let guard = Self;

        let mut out = io::stdout();
        execute!(
            out,
            EnterAlternateScreen,
            EnableBracketedPaste,
            terminal::Clear(terminal::ClearType::All)
        )
        .context("enter alternate screen")?;

        let terminal = Terminal::new(CrosstermBackend::new(out)).context("create terminal")?;
        Ok((guard, terminal))
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), DisableBracketedPaste, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

pub async fn run(paths: &BeaconPaths, settings: Settings, request_timeout: Duration) -> Result<()> {
    let store = Arc::new(SessionStore::new(paths.session_file.clone()));
    let stored = store.load().await;
    let transport = HttpTransport::new(&settings.server_url, request_timeout)?;

    let (_raw, mut terminal) = RawTerminal::enter()?;
    let shutdown = CancellationToken::new();
    let _stop_pumps = shutdown.clone().drop_guard();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Msg>();
    let mut scheduler = Scheduler::new(transport, store, msg_tx.clone());
    spawn_input_pump(msg_tx.clone(), shutdown.clone());
    spawn_tick_pump(msg_tx.clone(), shutdown);

    let area = terminal.size().context("read terminal size")?;
    let (model, _) = reduce(
        Model::new(settings),
        Msg::Resize {
            width: area.width,
            height: area.height,
        },
    );
    let (mut model, effects) = reduce(
        model,
        Msg::Init {
            stored,
            now_ms: unix_epoch_ms(),
        },
    );
    let mut quit = apply_effects(effects, &mut scheduler, &msg_tx, &mut terminal)?;

    while !quit {
        terminal.draw(|f| view::draw(f, &model)).context("draw")?;
        let Some(msg) = msg_rx.recv().await else {
            break;
        };
        let (next, effects) = reduce(model, msg);
        model = next;
        quit = apply_effects(effects, &mut scheduler, &msg_tx, &mut terminal)?;
    }

    tracing::info!("tui exited");
    Ok(())
}

/// Applies loop-local effects in order and spawns the rest. Returns true once
/// `Quit` was seen.
fn apply_effects<T, B>(
    effects: Vec<Effect>,
    scheduler: &mut Scheduler<T>,
    tx: &mpsc::UnboundedSender<Msg>,
    terminal: &mut Terminal<B>,
) -> Result<bool>
where
    T: Transport + Clone + 'static,
    B: Backend,
{
    let mut quit = false;
    for effect in effects {
        match effect {
            Effect::Quit => quit = true,
            Effect::Redraw => terminal.clear().context("clear terminal")?,
            Effect::SetServerUrl(url) => {
                if let Err(err) = scheduler.set_server_url(&url) {
                    tracing::warn!(server_url = %url, error = %err, "keeping previous server url");
                }
            }
            Effect::SetToken(token) => scheduler.set_token(token),
            Effect::Deliver(result) => {
                let _ = tx.send(Msg::ModalResult(result));
            }
            other if quit => {
                tracing::debug!(effect = ?other, "dropping effect after quit");
            }
            other => scheduler.spawn(other),
        }
    }
    Ok(quit)
}

fn translate(event: CEvent) -> Option<Msg> {
    match event {
        CEvent::Key(key) => map_key(key).map(Msg::Action),
        CEvent::Paste(text) => Some(Msg::Paste(text)),
        CEvent::Resize(width, height) => Some(Msg::Resize { width, height }),
        _ => None,
    }
}

/// Blocking crossterm reads on their own thread, polled so cancellation is
/// noticed within one interval.
fn spawn_input_pump(tx: mpsc::UnboundedSender<Msg>, shutdown: CancellationToken) {
    tokio::task::spawn_blocking(move || {
        while !shutdown.is_cancelled() {
            if !matches!(crossterm::event::poll(INPUT_POLL), Ok(true)) {
                continue;
            }
            let Some(msg) = crossterm::event::read().ok().and_then(translate) else {
                continue;
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
    });
}

fn spawn_tick_pump(tx: mpsc::UnboundedSender<Msg>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(TICK);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticks.tick() => {}
            }
            let tick = Msg::Tick {
                now_ms: unix_epoch_ms(),
            };
            if tx.send(tick).is_err() {
                return;
            }
        }
    });
}

fn unix_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn map_key(key: KeyEvent) -> Option<Action> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let action = match key.code {
        KeyCode::Char('c') if ctrl => Action::Quit,
        KeyCode::Char('l') if ctrl => Action::Redraw,
        KeyCode::Char('s') if ctrl => Action::Save,
        _ if ctrl => return None,
        KeyCode::Char(_) if alt => return None,
        KeyCode::Char(ch) => Action::Char(ch),
        KeyCode::Enter if shift => Action::ShiftEnter,
        KeyCode::Enter => Action::Enter,
        KeyCode::Tab => Action::Tab,
        KeyCode::BackTab => Action::BackTab,
        KeyCode::Esc => Action::Cancel,
        KeyCode::Backspace => Action::Backspace,
        KeyCode::Up => Action::MoveUp,
        KeyCode::Down => Action::MoveDown,
        KeyCode::Left => Action::Left,
        KeyCode::Right => Action::Right,
        KeyCode::PageUp => Action::PageUp,
        KeyCode::PageDown => Action::PageDown,
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tui::modal::ModalResult;
    use ratatui::backend::TestBackend;

    #[test]
    fn keymap_maps_expected_actions() {
        let none = KeyModifiers::NONE;
        let cases = [
            (KeyCode::Char('q'), none, Some(Action::Char('q'))),
            (KeyCode::Char('c'), KeyModifiers::CONTROL, Some(Action::Quit)),
            (KeyCode::Char('l'), KeyModifiers::CONTROL, Some(Action::Redraw)),
            (KeyCode::Char('s'), KeyModifiers::CONTROL, Some(Action::Save)),
            (KeyCode::Char('x'), KeyModifiers::CONTROL, None),
            (KeyCode::Char('x'), KeyModifiers::ALT, None),
            (KeyCode::BackTab, KeyModifiers::SHIFT, Some(Action::BackTab)),
            (KeyCode::Enter, none, Some(Action::Enter)),
            (KeyCode::Enter, KeyModifiers::SHIFT, Some(Action::ShiftEnter)),
            (KeyCode::Esc, none, Some(Action::Cancel)),
            (KeyCode::Left, none, Some(Action::Left)),
            (KeyCode::F(2), none, None),
        ];
        for (code, modifiers, want) in cases {
            assert_eq!(map_key(KeyEvent::new(code, modifiers)), want, "{code:?} {modifiers:?}");
        }
    }

    #[test]
    fn key_releases_are_ignored() {
        let mut key = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert_eq!(map_key(key), None);
    }

    #[tokio::test]
    async fn loop_local_effects_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(dir.path().join("session.json")));
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(transport, store, tx.clone());
        let mut terminal = Terminal::new(TestBackend::new(20, 5)).unwrap();

        let quit = apply_effects(
            vec![
                Effect::SetServerUrl("http://beacon.test".to_owned()),
                Effect::SetToken(Some("tok".to_owned())),
                Effect::Deliver(ModalResult::Logout),
            ],
            &mut scheduler,
            &tx,
            &mut terminal,
        )
        .unwrap();
        assert!(!quit);
        assert!(matches!(
            rx.try_recv(),
            Ok(Msg::ModalResult(ModalResult::Logout))
        ));

        let quit = apply_effects(
            vec![Effect::Quit, Effect::FetchRuns],
            &mut scheduler,
            &tx,
            &mut terminal,
        )
        .unwrap();
        assert!(quit);
    }
}
