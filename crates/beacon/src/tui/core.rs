use std::collections::BTreeMap;

use beacon_core::config::{
    ConfigFile, DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_MODELS_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SERVER_URL,
};
use beacon_core::credentials::StoredSession;
use beacon_core::error::ClientError;
use beacon_core::form::{Field, Form};
use beacon_core::params::{form_from_needs, refresh_form};
use beacon_core::tasks::TaskTracker;
use beacon_protocol::{
    AddAccountRequest, AskEvent, AskRequest, FieldSpec, Integration, ModelPageResponse,
    ModuleInfo, NeedsInput, Profile, ProviderState, Run, SubmitParamsRequest, SubmitResponse,
    WorkflowInfo,
};

use super::conversation::{summarize_result, Conversation};
use super::editor::Editor;
use super::modal::{
    HelpModal, IntegrationsModal, Modal, ModalContext, ModalResult, ModalStack, ModulesModal,
    ParamFormModal, SettingsModal, TasksModal, WorkflowsModal,
};
use super::session::{CancelHandle, RequestClass, Session};

const MAX_NOTIFICATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Input,
}

/// Effective runtime settings: config file values with CLI overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub models_page_size: usize,
    pub confirm_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            models_page_size: DEFAULT_MODELS_PAGE_SIZE,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
        }
    }
}

impl Settings {
    pub fn from_config(config: &ConfigFile, server_url: Option<&str>) -> Self {
        Self {
            server_url: server_url
                .unwrap_or_else(|| config.effective_server_url())
                .to_owned(),
            poll_interval_ms: config.effective_polling().effective_interval_ms(),
            models_page_size: config.effective_models_page_size(),
            confirm_timeout_ms: config.effective_confirm_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginState {
    pub form: Form,
    pub pending: bool,
    pub error: Option<String>,
}

impl LoginState {
    fn new(server_url: &str) -> Self {
        let form = Form::new(vec![
            Field::text("server_url", "Server").required(true).with_text(server_url),
            Field::text("email", "Email").required(true),
            Field::password("password", "Password").required(true),
        ]);
        let mut state = Self {
            form,
            pending: false,
            error: None,
        };
        state.form.focus_key("email");
        state
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    pub width: u16,
    pub height: u16,
    pub now_ms: u64,

    pub screen: Screen,
    pub mode: Mode,
    pub login: LoginState,
    pub editor: Editor,
    pub conversation: Conversation,
    pub session: Session,
    pub modals: ModalStack,
    pub tasks: TaskTracker,
    pub polling: bool,
    pub poll_generation: u64,
    /// The parameter request awaiting a server answer, kept so a rejected
    /// submit can reopen the same form.
    pub params_draft: Option<(NeedsInput, Form)>,

    pub credentials: Option<StoredSession>,
    pub settings: Settings,
    pub notifications: Vec<String>,
    pub status: Option<String>,
    pub quitting: bool,
}

impl Model {
    pub fn new(settings: Settings) -> Self {
        Self {
            width: 0,
            height: 0,
            now_ms: 0,
            screen: Screen::Login,
            mode: Mode::Normal,
            login: LoginState::new(&settings.server_url),
            editor: Editor::new(),
            conversation: Conversation::new(),
            session: Session::new(),
            modals: ModalStack::new(),
            tasks: TaskTracker::new(),
            polling: false,
            poll_generation: 0,
            params_draft: None,
            credentials: None,
            settings,
            notifications: Vec::new(),
            status: None,
            quitting: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Redraw,
    Save,
    Tab,
    BackTab,
    MoveUp,
    MoveDown,
    Left,
    Right,
    PageUp,
    PageDown,
    Enter,
    ShiftEnter,
    Backspace,
    Char(char),
    Cancel,
}

/// Which confirmation a `ConfirmExpired` timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmScope {
    Tasks,
    Integrations,
}

/// Timer payloads. Each carries enough identity that a stale firing is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerFire {
    ConfirmExpired {
        scope: ConfirmScope,
        key: String,
        id: String,
        deadline_ms: u64,
    },
    PollRuns {
        generation: u64,
    },
    RetryRunDetail {
        id: String,
        attempt: u32,
    },
}

#[derive(Debug, Clone)]
pub enum AskMsg {
    Event(AskEvent),
    /// The stream ended. Always the last message for a request.
    Closed,
    Failed(ClientError),
}

#[derive(Debug, Clone)]
pub enum ConfigMsg {
    ProviderStateLoaded {
        integration: String,
        result: Result<ProviderState, ClientError>,
    },
    ProviderFieldsLoaded {
        integration: String,
        provider: String,
        result: Result<Vec<FieldSpec>, ClientError>,
    },
    ModelsLoaded {
        integration: String,
        provider: String,
        account: String,
        seq: u64,
        result: Result<ModelPageResponse, ClientError>,
    },
    AccountAdded {
        integration: String,
        result: Result<(), ClientError>,
    },
    AccountDeleted {
        integration: String,
        result: Result<(), ClientError>,
    },
    ProfileSaved {
        integration: String,
        result: Result<(), ClientError>,
    },
    ProfileDeleted {
        integration: String,
        result: Result<(), ClientError>,
    },
    FieldsSaved {
        integration: String,
        result: Result<(), ClientError>,
    },
}

impl ConfigMsg {
    pub fn integration(&self) -> &str {
        match self {
            Self::ProviderStateLoaded { integration, .. }
            | Self::ProviderFieldsLoaded { integration, .. }
            | Self::ModelsLoaded { integration, .. }
            | Self::AccountAdded { integration, .. }
            | Self::AccountDeleted { integration, .. }
            | Self::ProfileSaved { integration, .. }
            | Self::ProfileDeleted { integration, .. }
            | Self::FieldsSaved { integration, .. } => integration,
        }
    }

    fn error(&self) -> Option<&ClientError> {
        match self {
            Self::ProviderStateLoaded { result, .. } => result.as_ref().err(),
            Self::ProviderFieldsLoaded { result, .. } => result.as_ref().err(),
            Self::ModelsLoaded { result, .. } => result.as_ref().err(),
            Self::AccountAdded { result, .. }
            | Self::AccountDeleted { result, .. }
            | Self::ProfileSaved { result, .. }
            | Self::ProfileDeleted { result, .. }
            | Self::FieldsSaved { result, .. } => result.as_ref().err(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Msg {
    Init {
        stored: Option<StoredSession>,
        now_ms: u64,
    },
    Resize {
        width: u16,
        height: u16,
    },
    Tick {
        now_ms: u64,
    },
    Action(Action),
    Paste(String),

    LoginFinished {
        server_url: String,
        result: Result<String, ClientError>,
    },
    WorkflowsLoaded(Result<Vec<WorkflowInfo>, ClientError>),
    WorkflowTriggered {
        workflow: String,
        result: Result<String, ClientError>,
    },
    RunsLoaded(Result<Vec<Run>, ClientError>),
    RunsPolled {
        generation: u64,
        result: Result<Vec<Run>, ClientError>,
    },
    RunDetailLoaded {
        id: String,
        attempt: u32,
        result: Result<Run, ClientError>,
    },
    RunDismissed {
        id: String,
        result: Result<(), ClientError>,
    },
    ModulesLoaded(Result<Vec<ModuleInfo>, ClientError>),
    ModuleUpdated {
        name: String,
        result: Result<(), ClientError>,
    },
    IntegrationsLoaded(Result<Vec<Integration>, ClientError>),
    Config(ConfigMsg),

    Ask {
        request_id: u64,
        event: AskMsg,
    },
    ParamsSubmitted {
        request_id: u64,
        result: Result<SubmitResponse, ClientError>,
    },

    Timer(TimerFire),
    ModalResult(ModalResult),
    CredentialsSaved(Result<(), String>),
}

impl Msg {
    /// The error a command reported, if any.
    pub fn error(&self) -> Option<&ClientError> {
        match self {
            Self::LoginFinished { result, .. } => result.as_ref().err(),
            Self::WorkflowsLoaded(result) => result.as_ref().err(),
            Self::WorkflowTriggered { result, .. } => result.as_ref().err(),
            Self::RunsLoaded(result) | Self::RunsPolled { result, .. } => result.as_ref().err(),
            Self::RunDetailLoaded { result, .. } => result.as_ref().err(),
            Self::RunDismissed { result, .. } | Self::ModuleUpdated { result, .. } => {
                result.as_ref().err()
            }
            Self::ModulesLoaded(result) => result.as_ref().err(),
            Self::IntegrationsLoaded(result) => result.as_ref().err(),
            Self::Config(config) => config.error(),
            Self::Ask {
                event: AskMsg::Failed(err),
                ..
            } => Some(err),
            Self::ParamsSubmitted { result, .. } => result.as_ref().err(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Quit,
    Redraw,
    SetServerUrl(String),
    SetToken(Option<String>),
    SaveCredentials(StoredSession),
    WipeCredentials,
    Login {
        server_url: String,
        email: String,
        password: String,
    },

    FetchWorkflows,
    TriggerWorkflow {
        name: String,
    },
    FetchRuns,
    PollRuns {
        generation: u64,
    },
    FetchRunDetail {
        id: String,
        attempt: u32,
    },
    DismissRun {
        id: String,
    },
    FetchModules,
    SetModuleEnabled {
        name: String,
        enabled: bool,
    },
    FetchIntegrations,
    SaveIntegrationFields {
        integration: String,
        values: BTreeMap<String, String>,
    },

    FetchProviderState {
        integration: String,
    },
    FetchProviderFields {
        integration: String,
        provider: String,
    },
    FetchModels {
        integration: String,
        provider: String,
        account: String,
        seq: u64,
        cursor: Option<String>,
        limit: usize,
    },
    AddProviderAccount {
        integration: String,
        provider: String,
        request: AddAccountRequest,
    },
    DeleteAccount {
        integration: String,
        provider: String,
        account: String,
    },
    SaveProfile {
        integration: String,
        profile: Profile,
        /// Old name when the profile was renamed; deleted before the save.
        replaces: Option<String>,
    },
    DeleteProfile {
        integration: String,
        name: String,
    },

    Ask {
        request: AskRequest,
        cancel: CancelHandle,
    },
    SubmitParams {
        request: SubmitParamsRequest,
        cancel: CancelHandle,
    },

    Timer {
        after_ms: u64,
        fire: TimerFire,
    },
    /// Queued back to the loop as `Msg::ModalResult`.
    Deliver(ModalResult),
}

pub fn reduce(mut model: Model, msg: Msg) -> (Model, Vec<Effect>) {
    let mut effects = Vec::new();

    if model.quitting {
        return (model, effects);
    }

    match msg {
        Msg::Action(Action::Quit) => {
            quit(&mut model, &mut effects);
            return (model, effects);
        }
        Msg::Action(Action::Redraw) => {
            effects.push(Effect::Redraw);
            return (model, effects);
        }
        _ => {}
    }

    if model.screen == Screen::Main && msg.error().is_some_and(ClientError::is_auth) {
        tracing::warn!("server rejected credentials; returning to login");
        reset_to_login(&mut model, &mut effects, Some("session expired, log in again"));
        return (model, effects);
    }

    match msg {
        Msg::Init { stored, now_ms } => {
            model.now_ms = now_ms;
            on_init(&mut model, &mut effects, stored);
        }
        Msg::Resize { width, height } => {
            model.width = width;
            model.height = height;
        }
        Msg::Tick { now_ms } => {
            model.now_ms = now_ms;
            let now_secs = i64::try_from(now_ms / 1_000).unwrap_or(i64::MAX);
            let expired = model
                .credentials
                .as_ref()
                .is_some_and(|c| c.is_expired(now_secs));
            if model.screen == Screen::Main && expired {
                tracing::info!("token expired");
                reset_to_login(&mut model, &mut effects, Some("session expired, log in again"));
            }
        }
        Msg::Action(action) => on_key(&mut model, &mut effects, action),
        Msg::Paste(text) => on_paste(&mut model, &mut effects, &text),
        other => {
            offer_to_modal(&mut model, &mut effects, &other);
            on_background(&mut model, &mut effects, other);
        }
    }

    (model, effects)
}

fn quit(model: &mut Model, effects: &mut Vec<Effect>) {
    model.quitting = true;
    model.session.cancel_all();
    effects.push(Effect::Quit);
}

/// Returns true if the modal consumed the message.
fn offer_to_modal(model: &mut Model, effects: &mut Vec<Effect>, msg: &Msg) -> bool {
    let ctx = ModalContext {
        now_ms: model.now_ms,
        settings: &model.settings,
        cache: &model.session.cache,
        tasks: &model.tasks,
    };
    match model.modals.update(msg, &ctx) {
        Some(more) => {
            effects.extend(more);
            true
        }
        None => false,
    }
}

fn open_modal(model: &mut Model, effects: &mut Vec<Effect>, modal: Modal) {
    effects.extend(model.modals.open(modal));
}

fn on_init(model: &mut Model, effects: &mut Vec<Effect>, stored: Option<StoredSession>) {
    let Some(stored) = stored else {
        return;
    };
    let now_secs = i64::try_from(model.now_ms / 1_000).unwrap_or(i64::MAX);
    if stored.is_expired(now_secs) {
        tracing::info!("stored session expired");
        model.login = LoginState::new(&stored.server_url);
        effects.push(Effect::WipeCredentials);
        return;
    }
    tracing::info!(server_url = %stored.server_url, "resuming stored session");
    effects.push(Effect::SetServerUrl(stored.server_url.clone()));
    effects.push(Effect::SetToken(Some(stored.token.clone())));
    model.settings.server_url = stored.server_url.clone();
    model.credentials = Some(stored);
    enter_main(model, effects);
}

fn enter_main(model: &mut Model, effects: &mut Vec<Effect>) {
    model.screen = Screen::Main;
    model.mode = Mode::Normal;
    model.status = None;
    effects.push(Effect::FetchWorkflows);
    effects.push(Effect::FetchModules);
    effects.push(Effect::FetchIntegrations);
    effects.push(Effect::FetchRuns);
}

/// Drops everything tied to the current credentials.
fn reset_to_login(model: &mut Model, effects: &mut Vec<Effect>, reason: Option<&str>) {
    model.session.cancel_all();
    model.session = Session::new();
    model.modals.close();
    model.conversation.clear();
    model.editor.clear_buffer();
    model.tasks = TaskTracker::new();
    model.polling = false;
    model.poll_generation += 1;
    model.params_draft = None;
    model.credentials = None;
    model.notifications.clear();
    model.status = None;
    model.screen = Screen::Login;
    model.mode = Mode::Normal;
    model.login = LoginState::new(&model.settings.server_url);
    model.login.error = reason.map(str::to_owned);
    effects.push(Effect::SetToken(None));
    effects.push(Effect::WipeCredentials);
}

fn on_paste(model: &mut Model, effects: &mut Vec<Effect>, text: &str) {
    if model.screen == Screen::Main && model.mode == Mode::Input && !model.modals.is_open() {
        model.editor.insert_str(text);
        return;
    }
    for ch in text.chars().filter(|c| !c.is_control()) {
        on_key(model, effects, Action::Char(ch));
    }
}

fn on_key(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    if model.screen == Screen::Login {
        on_login_key(model, effects, action);
        return;
    }
    let msg = Msg::Action(action);
    if offer_to_modal(model, effects, &msg) {
        return;
    }
    if model.modals.is_open() {
        on_modal_fallthrough_key(model, effects, action);
        return;
    }
    match model.mode {
        Mode::Input => on_input_key(model, effects, action),
        Mode::Normal => on_normal_key(model, effects, action),
    }
}

fn on_login_key(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    if model.login.pending {
        return;
    }
    let form = &mut model.login.form;
    match action {
        Action::Enter | Action::Save => {
            let last = form.focus() + 1 >= form.fields().len();
            if action == Action::Enter && !last {
                form.focus_next();
                return;
            }
            if let Err(err) = form.validate_required() {
                model.login.error = Some(err.to_string());
                return;
            }
            let server_url = form.text("server_url").trim().to_owned();
            let email = form.text("email").trim().to_owned();
            let password = form.text("password").to_owned();
            model.login.pending = true;
            model.login.error = None;
            tracing::info!(server_url = %server_url, "logging in");
            effects.push(Effect::Login {
                server_url,
                email,
                password,
            });
        }
        other => {
            super::modal::form_input(form, other);
        }
    }
}

/// Keys a modal did not consume may still switch to another modal. An
/// unconsumed 'q' acts as Esc on the open modal.
fn on_modal_fallthrough_key(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    if let Action::Char(ch) = action {
        if let Some(modal) = modal_for_key(model, ch) {
            open_modal(model, effects, modal);
        } else if ch == 'q' {
            offer_to_modal(model, effects, &Msg::Action(Action::Cancel));
        }
    }
}

fn modal_for_key(model: &Model, ch: char) -> Option<Modal> {
    Some(match ch {
        '?' => Modal::Help(HelpModal::default()),
        's' => Modal::Settings(SettingsModal),
        'm' => Modal::Modules(ModulesModal::default()),
        'w' => Modal::Workflows(WorkflowsModal::default()),
        'n' => Modal::Integrations(IntegrationsModal::default()),
        't' => Modal::Tasks(TasksModal::new(model.settings.confirm_timeout_ms)),
        _ => return None,
    })
}

fn on_normal_key(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    match action {
        Action::Enter | Action::Char('i') => model.mode = Mode::Input,
        Action::Char('q') => quit(model, effects),
        Action::Char('r') => {
            model.session.cache.error = None;
            effects.push(Effect::FetchWorkflows);
            effects.push(Effect::FetchModules);
            effects.push(Effect::FetchIntegrations);
        }
        Action::Char(ch) => {
            if let Some(modal) = modal_for_key(model, ch) {
                open_modal(model, effects, modal);
            }
        }
        Action::Cancel => cancel_ask(model),
        Action::MoveUp => model.conversation.scroll_from_bottom += 1,
        Action::PageUp => model.conversation.scroll_from_bottom += 10,
        Action::MoveDown => {
            model.conversation.scroll_from_bottom =
                model.conversation.scroll_from_bottom.saturating_sub(1);
        }
        Action::PageDown => {
            model.conversation.scroll_from_bottom =
                model.conversation.scroll_from_bottom.saturating_sub(10);
        }
        _ => {}
    }
}

fn on_input_key(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    match action {
        Action::Enter => {
            if let Some(text) = model.editor.take_submit() {
                start_ask(model, effects, text);
            }
        }
        Action::ShiftEnter => model.editor.insert_newline(),
        Action::Backspace => model.editor.backspace(),
        Action::Left => model.editor.move_left(),
        Action::Right => model.editor.move_right(),
        Action::MoveUp => model.editor.history_prev(),
        Action::MoveDown => model.editor.history_next(),
        Action::Char(ch) => model.editor.insert_char(ch),
        Action::Cancel => {
            if model.conversation.is_streaming() {
                cancel_ask(model);
            } else {
                model.mode = Mode::Normal;
            }
        }
        Action::Tab | Action::BackTab => model.mode = Mode::Normal,
        _ => {}
    }
}

fn start_ask(model: &mut Model, effects: &mut Vec<Effect>, text: String) {
    // A new question abandons any parameter round trip still open.
    model.session.cancel(RequestClass::Params);
    model.params_draft = None;
    let cancel = model.session.begin(RequestClass::Ask);
    model.conversation.start_ask(cancel.id(), &text);
    let context = model.session.context.clone();
    let has_context = context.kind.is_some() || context.target.is_some();
    tracing::debug!(request_id = cancel.id(), "ask");
    effects.push(Effect::Ask {
        request: AskRequest {
            text,
            context: has_context.then_some(context),
        },
        cancel,
    });
}

fn cancel_ask(model: &mut Model) {
    if model.session.cancel(RequestClass::Ask).is_some() {
        model.conversation.cancel_open();
        model.conversation.push_system("cancelled".to_owned());
    }
}

fn notify(model: &mut Model, message: String) {
    model.notifications.push(message);
    if model.notifications.len() > MAX_NOTIFICATIONS {
        let excess = model.notifications.len() - MAX_NOTIFICATIONS;
        model.notifications.drain(..excess);
    }
}

fn start_polling(model: &mut Model, effects: &mut Vec<Effect>) {
    if model.polling {
        return;
    }
    model.polling = true;
    model.poll_generation += 1;
    tracing::debug!(generation = model.poll_generation, "task poller started");
    schedule_poll(model, effects);
}

fn schedule_poll(model: &Model, effects: &mut Vec<Effect>) {
    effects.push(Effect::Timer {
        after_ms: model.settings.poll_interval_ms,
        fire: TimerFire::PollRuns {
            generation: model.poll_generation,
        },
    });
}

fn reconcile_runs(model: &mut Model, runs: &[Run]) {
    for note in model.tasks.reconcile(runs) {
        tracing::info!(run_id = %note.run_id, success = note.success, "run finished");
        notify(model, note.message);
    }
}

fn on_background(model: &mut Model, effects: &mut Vec<Effect>, msg: Msg) {
    match msg {
        Msg::LoginFinished { server_url, result } => {
            model.login.pending = false;
            match result {
                Ok(token) => {
                    let stored = StoredSession::new(server_url.clone(), token.clone());
                    effects.push(Effect::SetServerUrl(server_url.clone()));
                    effects.push(Effect::SetToken(Some(token)));
                    effects.push(Effect::SaveCredentials(stored.clone()));
                    model.settings.server_url = server_url;
                    model.credentials = Some(stored);
                    model.login.form.set_text("password", "");
                    enter_main(model, effects);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "login failed");
                    model.login.error = Some(match err {
                        ClientError::Auth => "invalid email or password".to_owned(),
                        other => other.to_string(),
                    });
                }
            }
        }
        Msg::WorkflowsLoaded(result) => match result {
            Ok(workflows) => {
                model.session.cache.workflows = Some(workflows);
                model.session.cache.error = None;
            }
            Err(err) => model.session.cache.error = Some(format!("workflows: {err}")),
        },
        Msg::ModulesLoaded(result) => match result {
            Ok(modules) => {
                model.session.cache.modules = Some(modules);
                model.session.cache.error = None;
            }
            Err(err) => model.session.cache.error = Some(format!("modules: {err}")),
        },
        Msg::IntegrationsLoaded(result) => match result {
            Ok(integrations) => {
                model.session.cache.integrations = Some(integrations);
                model.session.cache.error = None;
            }
            Err(err) => model.session.cache.error = Some(format!("integrations: {err}")),
        },
        Msg::ModuleUpdated { name, result } => match result {
            Ok(()) => effects.push(Effect::FetchModules),
            Err(err) => model.status = Some(format!("{name}: {err}")),
        },
        Msg::WorkflowTriggered { workflow, result } => match result {
            Ok(run_id) => {
                tracing::info!(workflow = %workflow, run_id = %run_id, "workflow triggered");
                model.tasks.track_triggered(&run_id, &workflow);
                model.status = Some(format!("started {workflow}"));
                start_polling(model, effects);
            }
            Err(err) => model.status = Some(format!("{workflow}: {err}")),
        },
        Msg::RunsLoaded(result) => match result {
            Ok(runs) => {
                reconcile_runs(model, &runs);
                if model.tasks.has_running() {
                    start_polling(model, effects);
                }
            }
            Err(err) => model.status = Some(format!("runs: {err}")),
        },
        Msg::RunsPolled { generation, result } => {
            if !model.polling || generation != model.poll_generation {
                return;
            }
            match result {
                Ok(runs) => reconcile_runs(model, &runs),
                Err(err) => tracing::warn!(error = %err, "run poll failed"),
            }
            if model.tasks.has_running() {
                schedule_poll(model, effects);
            } else {
                tracing::debug!("task poller idle");
                model.polling = false;
            }
        }
        Msg::Timer(TimerFire::PollRuns { generation }) => {
            if model.polling && generation == model.poll_generation {
                effects.push(Effect::PollRuns { generation });
            }
        }
        Msg::RunDismissed { id, result } => match result {
            Ok(()) => {
                model.status = Some(format!("dismissed {id}"));
                effects.push(Effect::FetchRuns);
            }
            Err(err) => model.status = Some(format!("dismiss {id}: {err}")),
        },
        Msg::Ask { request_id, event } => on_ask(model, request_id, event),
        Msg::ParamsSubmitted { request_id, result } => {
            on_params_submitted(model, request_id, result);
        }
        Msg::ModalResult(result) => on_modal_result(model, effects, result),
        Msg::CredentialsSaved(Err(err)) => {
            tracing::warn!(error = %err, "could not persist session");
            model.status = Some(format!("session not saved: {err}"));
        }
        _ => {}
    }
}

fn on_ask(model: &mut Model, request_id: u64, event: AskMsg) {
    if !model.session.is_current(RequestClass::Ask, request_id) {
        tracing::trace!(request_id, "dropping message for stale ask");
        return;
    }
    match event {
        AskMsg::Event(AskEvent::Route { context }) => model.session.context = context,
        AskMsg::Event(AskEvent::Chunk { text }) => {
            model.conversation.append_chunk(request_id, &text);
        }
        AskMsg::Event(AskEvent::Done) | AskMsg::Closed => {
            model.session.finish(RequestClass::Ask, request_id);
            model.conversation.finish(request_id);
        }
        AskMsg::Event(AskEvent::NeedsInput(needs)) => {
            model.session.finish(RequestClass::Ask, request_id);
            model
                .conversation
                .needs_input(request_id, &needs.target, needs.message.as_deref());
            model.mode = Mode::Normal;
            let modal = ParamFormModal::new(needs);
            model.modals.open(Modal::ParamForm(modal));
        }
        AskMsg::Event(AskEvent::Executed { result }) => {
            model.session.finish(RequestClass::Ask, request_id);
            model.conversation.executed(summarize_result(&result));
        }
        AskMsg::Event(AskEvent::Error { message }) => {
            model.session.finish(RequestClass::Ask, request_id);
            model.conversation.fail(request_id, &message);
        }
        AskMsg::Failed(err) => {
            model.session.finish(RequestClass::Ask, request_id);
            model.conversation.fail(request_id, &err.to_string());
        }
    }
}

fn reopen_params(model: &mut Model, request_id: u64, needs: NeedsInput, form: Form) {
    model
        .conversation
        .needs_input(request_id, &needs.target, None);
    model.mode = Mode::Normal;
    model
        .modals
        .open(Modal::ParamForm(ParamFormModal::with_form(needs, form)));
}

fn on_params_submitted(
    model: &mut Model,
    request_id: u64,
    result: Result<SubmitResponse, ClientError>,
) {
    if !model.session.finish(RequestClass::Params, request_id) {
        tracing::trace!(request_id, "dropping stale parameter response");
        return;
    }
    let draft = model.params_draft.take();
    match result {
        Ok(SubmitResponse::NeedsInput(needs)) => {
            let form = match &draft {
                Some((_, previous)) => refresh_form(previous, &needs),
                None => form_from_needs(&needs),
            };
            if let Some(message) = needs.message.as_deref().filter(|m| !m.trim().is_empty()) {
                model.conversation.push_system(message.to_owned());
            }
            reopen_params(model, request_id, needs, form);
        }
        Ok(SubmitResponse::Executed { result }) => {
            model.conversation.executed(summarize_result(&result));
        }
        Ok(SubmitResponse::Error { message }) => {
            model.conversation.push_system(format!("error: {message}"));
            model.conversation.reset_phase();
        }
        Err(ClientError::ServerValidation { message, fields }) => match draft {
            Some((needs, mut form)) => {
                let unmatched = form.apply_errors(&fields);
                let mut modal = ParamFormModal::with_form(needs, form);
                modal.error = message.or_else(|| (!unmatched.is_empty()).then(|| unmatched.join("; ")));
                model
                    .conversation
                    .needs_input(request_id, &modal.needs.target, None);
                model.mode = Mode::Normal;
                model.modals.open(Modal::ParamForm(modal));
            }
            None => {
                let err = ClientError::ServerValidation { message, fields };
                model.conversation.push_system(format!("error: {err}"));
                model.conversation.reset_phase();
            }
        },
        Err(err) => {
            model.conversation.push_system(format!("error: {err}"));
            model.conversation.reset_phase();
        }
    }
}

fn on_modal_result(model: &mut Model, effects: &mut Vec<Effect>, result: ModalResult) {
    match result {
        ModalResult::ParamsSubmitted {
            needs,
            form,
            values,
        } => {
            let cancel = model.session.begin(RequestClass::Params);
            model.conversation.submitting(cancel.id(), &needs.target);
            let request = SubmitParamsRequest {
                target: needs.target.clone(),
                values,
            };
            model.params_draft = Some((needs, form));
            effects.push(Effect::SubmitParams { request, cancel });
        }
        ModalResult::ParamsCancelled { target } => {
            tracing::debug!(target = %target, "parameters cancelled");
            model.params_draft = None;
            model.conversation.abandon_params();
        }
        ModalResult::Logout => {
            tracing::info!("logging out");
            reset_to_login(model, effects, None);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelpItem {
    pub key: &'static str,
    pub desc: &'static str,
}

pub fn help_items(model: &Model) -> Vec<HelpItem> {
    let item = |key, desc| HelpItem { key, desc };

    if model.screen == Screen::Login {
        return vec![
            item("Tab", "next field"),
            item("Enter", "log in"),
            item("Ctrl+C", "quit"),
        ];
    }

    if let Some(modal) = model.modals.active() {
        return match modal {
            Modal::ParamForm(_) => vec![
                item("Tab", "next field"),
                item("←/→", "choose"),
                item("Ctrl+S", "submit"),
                item("Esc", "cancel"),
            ],
            Modal::Integrations(m) if m.flow.is_some() => vec![
                item("↑/↓", "select"),
                item("Enter", "open/save"),
                item("d d", "delete"),
                item("PgUp/PgDn", "models"),
                item("Esc", "back"),
            ],
            Modal::Tasks(_) => vec![
                item("↑/↓", "select"),
                item("Enter", "details"),
                item("d d", "dismiss"),
                item("r", "refresh"),
                item("Esc", "close"),
            ],
            Modal::Settings(_) => vec![item("l", "log out"), item("Esc", "close")],
            _ => vec![
                item("↑/↓", "select"),
                item("Enter", "choose"),
                item("r", "refresh"),
                item("Esc", "close"),
            ],
        };
    }

    match model.mode {
        Mode::Input => vec![
            item("Enter", "send"),
            item("Shift+Enter", "newline"),
            item("↑/↓", "history"),
            item("Esc", if model.conversation.is_streaming() { "stop" } else { "exit" }),
            item("Ctrl+C", "quit"),
        ],
        Mode::Normal => {
            let mut items = vec![item("i", "ask")];
            if model.conversation.is_streaming() {
                items.push(item("Esc", "stop"));
            }
            items.extend([
                item("w", "workflows"),
                item("t", "tasks"),
                item("n", "integrations"),
                item("m", "modules"),
                item("s", "settings"),
                item("?", "help"),
                item("q", "quit"),
            ]);
            items
        }
    }
}
