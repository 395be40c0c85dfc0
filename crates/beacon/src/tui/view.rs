use beacon_core::form::{FieldKind, Form};
use beacon_core::tasks::Bucket;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

use super::conversation::{Role, TurnState};
use super::core::{help_items, Mode, Model, Screen};
use super::modal::Modal;
use super::resource_config::{ConfigFlow, Entry, ProvidersFlow, SubEditor};

pub fn draw(frame: &mut Frame<'_>, model: &Model) {
    frame.render_widget(Clear, frame.size());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.size());

    draw_header(frame, model, chunks[0]);
    match model.screen {
        Screen::Login => draw_login(frame, model, chunks[1]),
        Screen::Main => draw_main(frame, model, chunks[1]),
    }
    draw_footer(frame, model, chunks[2]);

    if let Some(modal) = model.modals.active() {
        draw_modal(frame, model, modal, chunks[1]);
    }
}

fn draw_header(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let mut spans = vec![
        Span::styled("beacon", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(&model.settings.server_url, Style::default().fg(Color::Gray)),
    ];

    if model.screen == Screen::Main {
        let running = model.tasks.in_bucket(Bucket::Running).count();
        if running > 0 {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("{} running: {running}", spinner_frame(model.now_ms)),
                Style::default().fg(Color::Cyan),
            ));
        }
        let attention = model.tasks.needs_attention();
        if attention > 0 {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("attention: {attention}"),
                Style::default().fg(Color::Red),
            ));
        }
        if let Some(target) = model.session.context.target.as_deref() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("→ {target}"),
                Style::default().fg(Color::Magenta),
            ));
        }
        if let Some(note) = model.notifications.last() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(note, Style::default().fg(Color::Green)));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn spinner_frame(now_ms: u64) -> &'static str {
    const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let idx = ((now_ms / 120) as usize) % SPINNER.len();
    SPINNER[idx]
}

fn draw_login(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let rect = centered_rect(60, 12, area);
    let block = Block::default().title("Log in").borders(Borders::ALL);
    let inner = block.inner(rect);
    frame.render_widget(Clear, rect);
    frame.render_widget(block, rect);

    let mut lines = form_lines(&model.login.form, true);
    if model.login.pending {
        lines.push(Line::from(Span::styled(
            "logging in…",
            Style::default().fg(Color::Yellow),
        )));
    }
    if let Some(err) = model.login.error.as_deref() {
        lines.push(error_line(err));
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn draw_main(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    if matches!(model.mode, Mode::Input) {
        let input_height = input_panel_height(model, area.height);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(input_height)])
            .split(area);
        draw_transcript(frame, model, rows[0]);
        draw_input_panel(frame, model, rows[1]);
        return;
    }
    draw_transcript(frame, model, area);
}

fn input_panel_height(model: &Model, max_height: u16) -> u16 {
    let inner = (model.editor.visual_lines() as u16).clamp(1, 6);
    let desired = inner.saturating_add(2).max(3);
    let max_total = max_height.saturating_sub(3).max(3);
    desired.min(max_total)
}

fn role_badge(role: Role) -> (&'static str, Style) {
    match role {
        Role::User => ("you", Style::default().fg(Color::Yellow)),
        Role::Assistant => ("bcn", Style::default().fg(Color::Cyan)),
        Role::System => (" · ", Style::default().fg(Color::Gray)),
    }
}

fn draw_transcript(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let block = Block::default().title("Conversation").borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let turns = model.conversation.turns();
    if turns.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "Press i to ask something",
                Style::default().fg(Color::Gray),
            ))),
            inner,
        );
        return;
    }

    let mut lines = Vec::new();
    for turn in turns {
        let (badge, style) = role_badge(turn.role);
        let text_style = match turn.state {
            TurnState::Cancelled => Style::default().fg(Color::DarkGray),
            TurnState::Failed => Style::default().fg(Color::Red),
            _ if turn.role == Role::System => Style::default().fg(Color::Gray),
            _ => Style::default(),
        };
        let mut text = turn.text.clone();
        if turn.state == TurnState::Open {
            text.push('▍');
        } else if turn.state == TurnState::Cancelled {
            text.push_str(" [cancelled]");
        }
        for (idx, part) in text.split('\n').enumerate() {
            let lead = if idx == 0 { badge } else { "   " };
            lines.push(Line::from(vec![
                Span::styled(lead, style.add_modifier(Modifier::BOLD)),
                Span::raw(" "),
                Span::styled(part.to_owned(), text_style),
            ]));
        }
    }

    let height = inner.height as usize;
    let end = lines.len().saturating_sub(model.conversation.scroll_from_bottom);
    let start = end.saturating_sub(height);
    let visible: Vec<Line> = lines.into_iter().skip(start).take(end - start).collect();
    frame.render_widget(Paragraph::new(visible), inner);
}

fn draw_input_panel(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let title = if model.conversation.is_streaming() {
        "Ask (streaming, Esc to stop)"
    } else {
        "Ask"
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if model.editor.buffer.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "Type a question…",
                Style::default().fg(Color::DarkGray),
            ))),
            inner,
        );
        return;
    }

    frame.render_widget(
        Paragraph::new(model.editor.with_cursor()).wrap(Wrap { trim: false }),
        inner,
    );
}

fn draw_footer(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let error = model
        .status
        .as_deref()
        .or(model.session.cache.error.as_deref());
    if let Some(status) = error.filter(|_| model.screen == Screen::Main) {
        let line = Line::from(vec![
            Span::styled("Error: ", Style::default().fg(Color::Red)),
            Span::raw(status),
            Span::styled("  (r to retry)", Style::default().fg(Color::DarkGray)),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let items = help_items(model);
    let mut spans = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(
            item.key,
            Style::default().add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(": "));
        spans.push(Span::styled(item.desc, Style::default().fg(Color::Gray)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_modal(frame: &mut Frame<'_>, model: &Model, modal: &Modal, area: Rect) {
    let rect = centered_rect(area.width.saturating_sub(8).max(40), area.height.saturating_sub(2), area);
    let block = Block::default()
        .title(modal.title())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(rect);
    frame.render_widget(Clear, rect);
    frame.render_widget(block, rect);

    let width = inner.width as usize;
    let lines = match modal {
        Modal::Help(help) => help_lines(model)
            .into_iter()
            .skip(help.scroll)
            .collect(),
        Modal::Settings(_) => vec![
            Line::from(format!("server: {}", model.settings.server_url)),
            Line::from(format!("poll interval: {} ms", model.settings.poll_interval_ms)),
            Line::from(format!("models per page: {}", model.settings.models_page_size)),
            Line::raw(""),
            Line::from(Span::styled("l  log out", Style::default().fg(Color::Yellow))),
        ],
        Modal::Modules(m) => match model.session.cache.modules.as_deref() {
            None => vec![loading_line()],
            Some(modules) => modules
                .iter()
                .enumerate()
                .map(|(idx, module)| {
                    let mark = if module.enabled { "[x]" } else { "[ ]" };
                    let text = format!("{mark} {}", module.name);
                    list_line(truncate_width(&text, width), idx == m.selected)
                })
                .collect(),
        },
        Modal::Workflows(m) => match model.session.cache.workflows.as_deref() {
            None => vec![loading_line()],
            Some(workflows) => workflows
                .iter()
                .enumerate()
                .map(|(idx, wf)| {
                    let text = match wf.description.as_deref() {
                        Some(desc) => format!("{}  {desc}", wf.name),
                        None => wf.name.clone(),
                    };
                    list_line(truncate_width(&text, width), idx == m.selected)
                })
                .collect(),
        },
        Modal::Tasks(m) => match &m.detail {
            Some(detail) => {
                let mut lines = vec![Line::from(format!("run {}", detail.id))];
                match (&detail.run, &detail.error) {
                    (Some(run), _) => {
                        lines.push(Line::from(format!("workflow: {}", run.workflow)));
                        lines.push(Line::from(format!("status: {:?}", run.status)));
                        if let Some(started) = run.started_at.as_deref() {
                            lines.push(Line::from(format!("started: {started}")));
                        }
                        if let Some(ended) = run.ended_at.as_deref() {
                            lines.push(Line::from(format!("ended: {ended}")));
                        }
                        if let Some(err) = run.error.as_deref() {
                            lines.push(error_line(err));
                        }
                    }
                    (None, Some(err)) => lines.push(error_line(err)),
                    (None, None) => lines.push(loading_line()),
                }
                lines
            }
            None if model.tasks.runs().is_empty() => vec![Line::from(Span::styled(
                "No runs yet",
                Style::default().fg(Color::Gray),
            ))],
            None => {
                let mut lines: Vec<Line> = model
                    .tasks
                    .runs()
                    .iter()
                    .enumerate()
                    .map(|(idx, tracked)| {
                        let flag = if tracked.run.needs_attention { " !" } else { "" };
                        let text = format!(
                            "{:<9} {}{flag}  {}",
                            tracked.bucket.as_str(),
                            tracked.run.workflow,
                            tracked.run.id
                        );
                        list_line(truncate_width(&text, width), idx == m.selected)
                    })
                    .collect();
                if let Some(id) = m.pending_dismiss() {
                    lines.push(confirm_line(&format!("press d again to dismiss {id}")));
                }
                lines
            }
        },
        Modal::Integrations(m) => match &m.flow {
            Some(ConfigFlow::Credentials(flow)) => {
                let mut lines = form_lines(&flow.form, true);
                if flow.saving {
                    lines.push(loading_line());
                }
                if let Some(err) = flow.error.as_deref() {
                    lines.push(error_line(err));
                }
                lines
            }
            Some(ConfigFlow::Providers(flow)) => provider_lines(flow, width),
            None => {
                let mut lines: Vec<Line> = match model.session.cache.integrations.as_deref() {
                    None => vec![loading_line()],
                    Some(integrations) => integrations
                        .iter()
                        .enumerate()
                        .map(|(idx, integration)| {
                            let mark = if integration.configured { "✓" } else { " " };
                            let text = format!(
                                "{mark} {}  ({})",
                                integration.name, integration.config_type
                            );
                            list_line(truncate_width(&text, width), idx == m.selected)
                        })
                        .collect(),
                };
                if let Some(err) = m.error.as_deref() {
                    lines.push(error_line(err));
                }
                lines
            }
        },
        Modal::ParamForm(m) => {
            let mut lines = vec![Line::from(Span::styled(
                m.needs.target.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ))];
            lines.extend(form_lines(&m.form, true));
            if let Some(err) = m.error.as_deref() {
                lines.push(error_line(err));
            }
            lines
        }
    };

    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn provider_lines(flow: &ProvidersFlow, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    match &flow.editor {
        Some(SubEditor::Profile(editor)) => {
            lines.extend(form_lines(&editor.form, true));
            let models = &editor.models;
            let mut page = format!("models page {}", models.page());
            if models.has_prev() {
                page.push_str("  PgUp: prev");
            }
            if models.has_next() {
                page.push_str("  PgDn: next");
            }
            if models.is_loading() {
                page.push_str("  loading…");
            }
            lines.push(Line::from(Span::styled(
                page,
                Style::default().fg(Color::DarkGray),
            )));
            if let Some(err) = editor.error.as_deref() {
                lines.push(error_line(err));
            }
        }
        Some(SubEditor::AddProvider(editor)) => {
            lines.extend(form_lines(&editor.form, true));
            if editor.fields_for.is_none() {
                lines.push(loading_line());
            }
            if let Some(err) = editor.error.as_deref() {
                lines.push(error_line(err));
            }
        }
        None if flow.state.is_none() => lines.push(loading_line()),
        None => {
            for (idx, entry) in flow.entries.iter().enumerate() {
                let text = match entry {
                    Entry::Header(title) => {
                        lines.push(Line::from(Span::styled(
                            (*title).to_owned(),
                            Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
                        )));
                        continue;
                    }
                    Entry::Profile { name, is_default } => {
                        if *is_default {
                            format!("{name} (default)")
                        } else {
                            name.clone()
                        }
                    }
                    Entry::NewProfile => "+ new profile".to_owned(),
                    Entry::Account { provider, account } => format!("{provider} / {account}"),
                    Entry::AddProvider => "+ add provider".to_owned(),
                };
                lines.push(list_line(truncate_width(&text, width), idx == flow.selected));
            }
            if let Some(id) = flow.confirm.pending_id() {
                lines.push(confirm_line(&format!("press d again to delete {id}")));
            }
        }
    }
    if let Some(err) = flow.error.as_deref() {
        lines.push(error_line(err));
    }
    lines
}

fn form_lines(form: &Form, focused: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (idx, field) in form.fields().iter().enumerate() {
        let has_focus = focused && idx == form.focus();
        let marker = if has_focus { "▶ " } else { "  " };
        let label = if field.required {
            format!("{}*", field.label)
        } else {
            field.label.clone()
        };
        let value = match &field.kind {
            FieldKind::Password => "•".repeat(field.text.chars().count()),
            FieldKind::Select { .. } => {
                let current = field
                    .choice()
                    .and_then(|v| field.options().iter().find(|o| o.value == v))
                    .map(|o| o.label.clone())
                    .unwrap_or_else(|| "-".to_owned());
                format!("‹ {current} ›")
            }
            FieldKind::Checkbox { checked: true } => "[x]".to_owned(),
            FieldKind::Checkbox { checked: false } => "[ ]".to_owned(),
            FieldKind::Text | FieldKind::TextArea => field.text.clone(),
        };
        let value_style = if has_focus {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };

        let mut parts = value.split('\n');
        let first = parts.next().unwrap_or_default().to_owned();
        lines.push(Line::from(vec![
            Span::raw(marker),
            Span::styled(format!("{label}: "), Style::default().fg(Color::Gray)),
            Span::styled(first, value_style),
        ]));
        for rest in parts {
            lines.push(Line::from(vec![
                Span::raw("    "),
                Span::styled(rest.to_owned(), value_style),
            ]));
        }
        if let Some(err) = field.error.as_deref() {
            lines.push(Line::from(Span::styled(
                format!("    {err}"),
                Style::default().fg(Color::Red),
            )));
        } else if has_focus {
            if let Some(desc) = field.description.as_deref() {
                lines.push(Line::from(Span::styled(
                    format!("    {desc}"),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
    }
    lines
}

fn help_lines(model: &Model) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(Span::styled(
            "Keys",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from("  i / Enter   ask a question"),
        Line::from("  Esc         stop a streaming answer"),
        Line::from("  w           workflows"),
        Line::from("  t           tasks"),
        Line::from("  n           integrations"),
        Line::from("  m           modules"),
        Line::from("  s           settings"),
        Line::from("  r           retry background refresh"),
        Line::from("  Ctrl+L      redraw"),
        Line::from("  q / Ctrl+C  quit"),
    ];
    if !model.notifications.is_empty() {
        lines.push(Line::raw(""));
        lines.push(Line::from(Span::styled(
            "Recent",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for note in &model.notifications {
            lines.push(Line::from(format!("  {note}")));
        }
    }
    lines
}

fn list_line(text: String, selected: bool) -> Line<'static> {
    let prefix = if selected { "▶ " } else { "  " };
    let style = if selected {
        Style::default().bg(Color::DarkGray)
    } else {
        Style::default()
    };
    Line::from(format!("{prefix}{text}")).style(style)
}

fn loading_line() -> Line<'static> {
    Line::from(Span::styled("loading…", Style::default().fg(Color::Gray)))
}

fn error_line(message: &str) -> Line<'static> {
    Line::from(Span::styled(
        message.to_owned(),
        Style::default().fg(Color::Red),
    ))
}

fn confirm_line(message: &str) -> Line<'static> {
    Line::from(Span::styled(
        message.to_owned(),
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))
}

/// Cuts `input` to at most `max` display columns.
fn truncate_width(input: &str, max: usize) -> String {
    if input.width() <= max {
        return input.to_owned();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in input.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}
