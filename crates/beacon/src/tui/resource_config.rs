//! Per-integration configuration flows, chosen by the server-declared
//! `config_type`.

use std::collections::BTreeMap;

use beacon_core::confirm::Confirmation;
use beacon_core::error::ClientError;
use beacon_core::form::{Field, Form, SelectOption};
use beacon_core::pagination::{ModelsPage, PageRequest};
use beacon_protocol::{
    AddAccountRequest, FieldSpec, Integration, KnownProvider, ModelPageResponse, Profile,
    ProviderAccount, ProviderState, CONFIG_TYPE_CREDENTIALS, CONFIG_TYPE_PROVIDERS,
};

use super::core::{Action, ConfigMsg, ConfirmScope, Effect, Msg, Settings};
use super::modal::{expire_confirm, form_input, press_confirm, FormInput, ModalContext, Press, Step};

const DELETE_PROFILE: &str = "delete_profile";
const DELETE_ACCOUNT: &str = "delete_account";

pub(crate) fn field_from_spec(spec: &FieldSpec) -> Field {
    let label = if spec.label.is_empty() {
        spec.key.as_str()
    } else {
        spec.label.as_str()
    };
    let field = if spec.secret {
        Field::password(&spec.key, label)
    } else {
        Field::text(&spec.key, label)
    };
    field
        .required(spec.required)
        .with_description(spec.description.clone())
        .with_text(spec.default.clone().unwrap_or_default())
}

/// Copies server field errors onto `form`; returns whatever had no field.
fn apply_client_error(form: &mut Form, err: &ClientError) -> Option<String> {
    match err.field_errors() {
        Some(fields) => {
            let unmatched = form.apply_errors(fields);
            match err {
                ClientError::ServerValidation {
                    message: Some(msg), ..
                } if !msg.trim().is_empty() => Some(msg.clone()),
                _ if unmatched.is_empty() => None,
                _ => Some(unmatched.join("; ")),
            }
        }
        None => Some(err.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFlow {
    Credentials(CredentialsFlow),
    Providers(ProvidersFlow),
}

impl ConfigFlow {
    /// Picks the flow for `integration.config_type`. Unknown types are an
    /// error, never a fallback.
    pub fn resolve(
        integration: &Integration,
        settings: &Settings,
    ) -> Result<(Self, Vec<Effect>), ClientError> {
        match integration.config_type.as_str() {
            CONFIG_TYPE_CREDENTIALS => Ok((
                Self::Credentials(CredentialsFlow::new(integration)),
                Vec::new(),
            )),
            CONFIG_TYPE_PROVIDERS => {
                let flow = ProvidersFlow::new(
                    &integration.name,
                    settings.confirm_timeout_ms,
                    settings.models_page_size,
                );
                let init = Effect::FetchProviderState {
                    integration: integration.name.clone(),
                };
                Ok((Self::Providers(flow), vec![init]))
            }
            other => Err(ClientError::Unsupported(other.to_owned())),
        }
    }

    pub fn integration(&self) -> &str {
        match self {
            Self::Credentials(flow) => &flow.integration,
            Self::Providers(flow) => &flow.integration,
        }
    }

    /// `Close` hands control back to the integration list.
    pub fn update(self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        match self {
            Self::Credentials(flow) => flow.update(msg).map(Self::Credentials),
            Self::Providers(flow) => flow.update(msg, ctx).map(Self::Providers),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsFlow {
    pub integration: String,
    pub form: Form,
    pub error: Option<String>,
    pub saving: bool,
}

impl CredentialsFlow {
    pub fn new(integration: &Integration) -> Self {
        Self {
            integration: integration.name.clone(),
            form: Form::new(integration.fields.iter().map(field_from_spec).collect()),
            error: None,
            saving: false,
        }
    }

    fn update(mut self, msg: &Msg) -> Step<Self> {
        match msg {
            Msg::Action(Action::Cancel) => Step::Close(Vec::new()),
            Msg::Action(Action::Enter) => {
                self.form.focus_next();
                Step::Stay(self, Vec::new())
            }
            Msg::Action(Action::Save) => {
                if let Err(err) = self.form.validate_required() {
                    self.error = Some(err.to_string());
                    return Step::Stay(self, Vec::new());
                }
                self.error = None;
                self.saving = true;
                let effect = Effect::SaveIntegrationFields {
                    integration: self.integration.clone(),
                    values: self.form.string_values(),
                };
                Step::Stay(self, vec![effect])
            }
            Msg::Action(action) => {
                form_input(&mut self.form, *action);
                Step::Stay(self, Vec::new())
            }
            Msg::Config(ConfigMsg::FieldsSaved {
                integration,
                result,
            }) if *integration == self.integration => {
                self.saving = false;
                match result {
                    Ok(()) => Step::Close(vec![Effect::FetchIntegrations]),
                    Err(err) => {
                        self.error = apply_client_error(&mut self.form, err);
                        Step::Stay(self, Vec::new())
                    }
                }
            }
            _ => Step::Unhandled(self),
        }
    }
}

/// One row of the flattened provider list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Header(&'static str),
    Profile { name: String, is_default: bool },
    NewProfile,
    Account { provider: String, account: String },
    AddProvider,
}

impl Entry {
    pub fn is_selectable(&self) -> bool {
        !matches!(self, Self::Header(_))
    }
}

pub fn build_entries(state: &ProviderState) -> Vec<Entry> {
    let mut entries = vec![Entry::Header("Profiles")];
    entries.extend(state.profiles.iter().map(|p| Entry::Profile {
        name: p.name.clone(),
        is_default: p.is_default,
    }));
    entries.push(Entry::NewProfile);
    entries.push(Entry::Header("Providers"));
    for provider in &state.providers {
        entries.extend(provider.accounts.iter().map(|account| Entry::Account {
            provider: provider.provider.clone(),
            account: account.clone(),
        }));
    }
    entries.push(Entry::AddProvider);
    entries
}

/// Nearest selectable index at or after `idx`, else before it.
fn clamp_selection(entries: &[Entry], idx: usize) -> usize {
    let idx = idx.min(entries.len().saturating_sub(1));
    (idx..entries.len())
        .chain((0..idx).rev())
        .find(|&i| entries[i].is_selectable())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubEditor {
    Profile(ProfileEditor),
    AddProvider(AddProviderEditor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidersFlow {
    pub integration: String,
    pub state: Option<ProviderState>,
    pub entries: Vec<Entry>,
    pub selected: usize,
    pub confirm: Confirmation,
    pub editor: Option<SubEditor>,
    pub error: Option<String>,
    page_size: usize,
}

impl ProvidersFlow {
    pub fn new(integration: &str, confirm_timeout_ms: u64, page_size: usize) -> Self {
        let state = ProviderState::default();
        let entries = build_entries(&state);
        Self {
            integration: integration.to_owned(),
            state: None,
            selected: clamp_selection(&entries, 0),
            entries,
            confirm: Confirmation::new(confirm_timeout_ms),
            editor: None,
            error: None,
            page_size,
        }
    }

    pub fn selected_entry(&self) -> Option<&Entry> {
        self.entries.get(self.selected)
    }

    fn refresh(&self) -> Effect {
        Effect::FetchProviderState {
            integration: self.integration.clone(),
        }
    }

    fn set_state(&mut self, state: ProviderState) {
        self.entries = build_entries(&state);
        self.selected = clamp_selection(&self.entries, self.selected);
        self.state = Some(state);
    }

    fn move_selection(&mut self, forward: bool) {
        let mut idx = self.selected;
        loop {
            let next = if forward {
                idx + 1
            } else {
                match idx.checked_sub(1) {
                    Some(i) => i,
                    None => return,
                }
            };
            match self.entries.get(next) {
                None => return,
                Some(entry) if entry.is_selectable() => {
                    self.selected = next;
                    return;
                }
                Some(_) => idx = next,
            }
        }
    }

    fn update(mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        if expire_confirm(&mut self.confirm, ConfirmScope::Integrations, msg) {
            return Step::Stay(self, Vec::new());
        }
        if let Msg::Config(config) = msg {
            return self.on_config(config);
        }
        let Msg::Action(action) = msg else {
            return Step::Unhandled(self);
        };
        if let Some(editor) = self.editor.take() {
            return self.on_editor_action(editor, *action);
        }

        match action {
            Action::Cancel => Step::Close(Vec::new()),
            Action::MoveUp | Action::MoveDown => {
                self.confirm.clear();
                self.move_selection(matches!(action, Action::MoveDown));
                Step::Stay(self, Vec::new())
            }
            Action::Char('r') => {
                self.confirm.clear();
                let effect = self.refresh();
                Step::Stay(self, vec![effect])
            }
            Action::Enter => self.open_selected(),
            Action::Char('d') => self.delete_selected(ctx.now_ms),
            _ => Step::Unhandled(self),
        }
    }

    fn open_selected(mut self) -> Step<Self> {
        self.confirm.clear();
        let Some(state) = self.state.as_ref() else {
            return Step::Stay(self, Vec::new());
        };
        let (editor, effects) = match self.selected_entry() {
            Some(Entry::Profile { name, .. }) => {
                let Some(profile) = state.profiles.iter().find(|p| &p.name == name) else {
                    return Step::Stay(self, Vec::new());
                };
                let (editor, effects) =
                    ProfileEditor::edit(&self.integration, profile, &state.providers, self.page_size);
                (SubEditor::Profile(editor), effects)
            }
            Some(Entry::NewProfile) => (
                SubEditor::Profile(ProfileEditor::create(&state.providers, self.page_size)),
                Vec::new(),
            ),
            Some(Entry::AddProvider) => {
                let (editor, effects) = AddProviderEditor::new(&self.integration, &state.available);
                (SubEditor::AddProvider(editor), effects)
            }
            _ => return Step::Stay(self, Vec::new()),
        };
        self.editor = Some(editor);
        Step::Stay(self, effects)
    }

    fn delete_selected(mut self, now_ms: u64) -> Step<Self> {
        let (key, id, effect) = match self.selected_entry() {
            Some(Entry::Profile { name, .. }) => (
                DELETE_PROFILE,
                name.clone(),
                Effect::DeleteProfile {
                    integration: self.integration.clone(),
                    name: name.clone(),
                },
            ),
            Some(Entry::Account { provider, account }) => (
                DELETE_ACCOUNT,
                format!("{provider}/{account}"),
                Effect::DeleteAccount {
                    integration: self.integration.clone(),
                    provider: provider.clone(),
                    account: account.clone(),
                },
            ),
            _ => return Step::Stay(self, Vec::new()),
        };
        match press_confirm(
            &mut self.confirm,
            ConfirmScope::Integrations,
            key,
            &id,
            now_ms,
        ) {
            Press::Confirmed => {
                tracing::info!(integration = %self.integration, entry = %id, op = key, "confirmed delete");
                Step::Stay(self, vec![effect])
            }
            Press::Armed(timer) => Step::Stay(self, vec![timer]),
        }
    }

    fn on_editor_action(mut self, editor: SubEditor, action: Action) -> Step<Self> {
        let step = match editor {
            SubEditor::Profile(e) => e.on_action(&self.integration, action).map(SubEditor::Profile),
            SubEditor::AddProvider(e) => e
                .on_action(&self.integration, action)
                .map(SubEditor::AddProvider),
        };
        match step {
            Step::Unhandled(editor) => {
                self.editor = Some(editor);
                Step::Unhandled(self)
            }
            Step::Stay(editor, effects) => {
                self.editor = Some(editor);
                Step::Stay(self, effects)
            }
            Step::Close(effects) => Step::Stay(self, effects),
        }
    }

    fn on_config(mut self, msg: &ConfigMsg) -> Step<Self> {
        if msg.integration() != self.integration {
            return Step::Unhandled(self);
        }
        match msg {
            ConfigMsg::ProviderStateLoaded { result, .. } => match result {
                Ok(state) => {
                    self.error = None;
                    if let Some(SubEditor::Profile(editor)) = self.editor.as_mut() {
                        editor.providers = state.providers.clone();
                    }
                    self.set_state(state.clone());
                }
                Err(err) => self.error = Some(err.to_string()),
            },
            ConfigMsg::AccountDeleted { result, .. } | ConfigMsg::ProfileDeleted { result, .. } => {
                return match result {
                    Ok(()) => {
                        let effect = self.refresh();
                        Step::Stay(self, vec![effect])
                    }
                    Err(err) => {
                        self.error = Some(err.to_string());
                        Step::Stay(self, Vec::new())
                    }
                };
            }
            ConfigMsg::ProfileSaved { result, .. } | ConfigMsg::AccountAdded { result, .. } => {
                return match result {
                    Ok(()) => {
                        self.editor = None;
                        let effect = self.refresh();
                        Step::Stay(self, vec![effect])
                    }
                    Err(err) => {
                        match self.editor.as_mut() {
                            Some(SubEditor::Profile(e)) => e.rejected(err),
                            Some(SubEditor::AddProvider(e)) => e.rejected(err),
                            None => self.error = Some(err.to_string()),
                        }
                        Step::Stay(self, Vec::new())
                    }
                };
            }
            ConfigMsg::ProviderFieldsLoaded {
                provider, result, ..
            } => {
                if let Some(SubEditor::AddProvider(editor)) = self.editor.as_mut() {
                    editor.fields_loaded(provider, result);
                }
            }
            ConfigMsg::ModelsLoaded {
                provider,
                account,
                seq,
                result,
                ..
            } => {
                if let Some(SubEditor::Profile(editor)) = self.editor.as_mut() {
                    editor.models_loaded(provider, account, *seq, result);
                }
            }
            ConfigMsg::FieldsSaved { .. } => return Step::Unhandled(self),
        }
        Step::Stay(self, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEditor {
    pub form: Form,
    pub models: ModelsPage,
    pub providers: Vec<ProviderAccount>,
    pub original_name: Option<String>,
    pub error: Option<String>,
    /// Model chosen before the last reload; reselected only if a loaded page
    /// offers it again.
    model_hint: Option<String>,
    page_size: usize,
}

fn provider_options(providers: &[ProviderAccount]) -> Vec<SelectOption> {
    providers
        .iter()
        .map(|p| {
            let label = if p.display_name.is_empty() {
                &p.provider
            } else {
                &p.display_name
            };
            SelectOption::new(p.provider.clone(), label.clone())
        })
        .collect()
}

impl ProfileEditor {
    fn form(providers: &[ProviderAccount]) -> Form {
        Form::new(vec![
            Field::text("name", "Name").required(true),
            Field::select("provider", "Provider", provider_options(providers)).required(true),
            Field::select("account", "Account", Vec::new()).required(true),
            Field::select("model", "Model", Vec::new()).required(true),
            Field::checkbox("default", "Default", false),
        ])
    }

    pub fn create(providers: &[ProviderAccount], page_size: usize) -> Self {
        Self {
            form: Self::form(providers),
            models: ModelsPage::new(),
            providers: providers.to_vec(),
            original_name: None,
            error: None,
            model_hint: None,
            page_size,
        }
    }

    pub fn edit(
        integration: &str,
        profile: &Profile,
        providers: &[ProviderAccount],
        page_size: usize,
    ) -> (Self, Vec<Effect>) {
        let mut editor = Self::create(providers, page_size);
        editor.original_name = Some(profile.name.clone());
        editor.form.set_text("name", profile.name.clone());
        editor.form.select_value("provider", &profile.provider);
        editor.sync_accounts();
        editor.form.select_value("account", &profile.account);
        editor.model_hint = Some(profile.model.clone());
        editor.form.set_checked("default", profile.is_default);
        let effects = editor.reload_models(integration).into_iter().collect();
        (editor, effects)
    }

    fn accounts_for(&self, provider: Option<&str>) -> Vec<SelectOption> {
        provider
            .and_then(|name| self.providers.iter().find(|p| p.provider == name))
            .map(|p| p.accounts.iter().cloned().map(SelectOption::plain).collect())
            .unwrap_or_default()
    }

    fn sync_accounts(&mut self) {
        let accounts = self.accounts_for(self.form.choice("provider"));
        self.form.set_options("account", accounts);
    }

    fn fetch(&self, integration: &str, req: PageRequest) -> Option<Effect> {
        let provider = self.form.choice("provider")?;
        let account = self.form.choice("account")?;
        Some(Effect::FetchModels {
            integration: integration.to_owned(),
            provider: provider.to_owned(),
            account: account.to_owned(),
            seq: req.seq,
            cursor: req.cursor,
            limit: self.page_size,
        })
    }

    /// Restarts model pagination at page 1 for the current provider/account.
    /// The model field stays empty until that page commits.
    fn reload_models(&mut self, integration: &str) -> Option<Effect> {
        if let Some(model) = self.form.choice("model") {
            self.model_hint = Some(model.to_owned());
        }
        self.form.set_options("model", Vec::new());
        if self.form.choice("account").is_none() {
            self.models.reset();
            return None;
        }
        let req = self.models.begin_first();
        self.fetch(integration, req)
    }

    fn on_action(mut self, integration: &str, action: Action) -> Step<Self> {
        let on_model = self.form.focused_key() == Some("model");
        match action {
            Action::Cancel => Step::Close(Vec::new()),
            Action::PageDown if on_model => {
                let effects = self
                    .models
                    .begin_next()
                    .and_then(|req| self.fetch(integration, req))
                    .into_iter()
                    .collect();
                Step::Stay(self, effects)
            }
            Action::PageUp if on_model => {
                let effects = self
                    .models
                    .begin_prev()
                    .and_then(|req| self.fetch(integration, req))
                    .into_iter()
                    .collect();
                Step::Stay(self, effects)
            }
            Action::Enter | Action::Save => self.save(integration),
            other => {
                let effects = match form_input(&mut self.form, other) {
                    FormInput::Selected(key) if key == "provider" => {
                        self.sync_accounts();
                        self.reload_models(integration).into_iter().collect()
                    }
                    FormInput::Selected(key) if key == "account" => {
                        self.reload_models(integration).into_iter().collect()
                    }
                    FormInput::Ignored => return Step::Unhandled(self),
                    _ => Vec::new(),
                };
                Step::Stay(self, effects)
            }
        }
    }

    fn save(mut self, integration: &str) -> Step<Self> {
        if let Err(err) = self.form.validate_required() {
            self.error = Some(err.to_string());
            return Step::Stay(self, Vec::new());
        }
        self.error = None;
        let profile = Profile {
            name: self.form.text("name").trim().to_owned(),
            provider: self.form.choice("provider").unwrap_or_default().to_owned(),
            account: self.form.choice("account").unwrap_or_default().to_owned(),
            model: self.form.choice("model").unwrap_or_default().to_owned(),
            is_default: self.form.checked("default"),
        };
        let replaces = self
            .original_name
            .clone()
            .filter(|old| *old != profile.name);
        let effect = Effect::SaveProfile {
            integration: integration.to_owned(),
            profile,
            replaces,
        };
        Step::Stay(self, vec![effect])
    }

    fn models_loaded(
        &mut self,
        provider: &str,
        account: &str,
        seq: u64,
        result: &Result<ModelPageResponse, ClientError>,
    ) {
        let current = (self.form.choice("provider"), self.form.choice("account"));
        if current != (Some(provider), Some(account)) {
            return;
        }
        match result {
            Ok(resp) => {
                if self.models.commit(seq, resp.clone()) {
                    let options = self
                        .models
                        .items()
                        .iter()
                        .map(|m| SelectOption::new(m.id.clone(), m.label()))
                        .collect();
                    self.form.set_options("model", options);
                    if self.form.choice("model").is_none() {
                        if let Some(hint) = self.model_hint.as_deref() {
                            if self.form.select_value("model", hint) {
                                self.model_hint = None;
                            }
                        }
                    }
                }
            }
            Err(err) => {
                if self.models.fail(seq) {
                    self.error = Some(format!("loading models: {err}"));
                }
            }
        }
    }

    fn rejected(&mut self, err: &ClientError) {
        self.error = apply_client_error(&mut self.form, err);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddProviderEditor {
    pub form: Form,
    pub dynamic: Vec<FieldSpec>,
    /// Provider whose field set `dynamic` describes.
    pub fields_for: Option<String>,
    pub error: Option<String>,
}

impl AddProviderEditor {
    pub fn new(integration: &str, available: &[KnownProvider]) -> (Self, Vec<Effect>) {
        let options = available
            .iter()
            .map(|p| {
                let label = if p.display_name.is_empty() {
                    p.provider.clone()
                } else {
                    p.display_name.clone()
                };
                SelectOption::new(p.provider.clone(), label)
            })
            .collect();
        let mut form = Form::new(vec![
            Field::select("provider", "Provider", options).required(true),
            Field::text("account", "Account name").required(true),
        ]);
        let first = available.first().map(|p| p.provider.clone());
        if let Some(first) = &first {
            form.select_value("provider", first);
        }
        let editor = Self {
            form,
            dynamic: Vec::new(),
            fields_for: None,
            error: None,
        };
        let effects = first
            .map(|provider| Effect::FetchProviderFields {
                integration: integration.to_owned(),
                provider,
            })
            .into_iter()
            .collect();
        (editor, effects)
    }

    fn on_action(mut self, integration: &str, action: Action) -> Step<Self> {
        match action {
            Action::Cancel => Step::Close(Vec::new()),
            Action::Enter | Action::Save => self.save(integration),
            other => match form_input(&mut self.form, other) {
                FormInput::Selected(key) if key == "provider" => {
                    let effects = self
                        .form
                        .choice("provider")
                        .map(|provider| Effect::FetchProviderFields {
                            integration: integration.to_owned(),
                            provider: provider.to_owned(),
                        })
                        .into_iter()
                        .collect();
                    Step::Stay(self, effects)
                }
                FormInput::Ignored => Step::Unhandled(self),
                _ => Step::Stay(self, Vec::new()),
            },
        }
    }

    /// Rebuilds the form around a new field set, keeping the static fields
    /// and anything typed into keys that still exist.
    fn fields_loaded(&mut self, provider: &str, result: &Result<Vec<FieldSpec>, ClientError>) {
        if self.form.choice("provider") != Some(provider) {
            return;
        }
        let specs = match result {
            Ok(specs) => specs,
            Err(err) => {
                self.error = Some(format!("loading fields for {provider}: {err}"));
                return;
            }
        };
        let typed: BTreeMap<String, String> = self
            .form
            .fields()
            .iter()
            .filter(|f| f.key != "provider" && !f.text.is_empty())
            .map(|f| (f.key.clone(), f.text.clone()))
            .collect();
        let focus = self.form.focused_key().map(str::to_owned);

        let mut fields: Vec<Field> = self.form.fields()[..2].to_vec();
        fields.extend(
            specs
                .iter()
                .filter(|s| s.key != "provider" && s.key != "account")
                .map(field_from_spec),
        );
        let mut form = Form::new(fields);
        for (key, text) in &typed {
            form.set_text(key, text.clone());
        }
        if let Some(key) = focus {
            form.focus_key(&key);
        }
        self.form = form;
        self.dynamic = specs.clone();
        self.fields_for = Some(provider.to_owned());
        self.error = None;
    }

    fn save(mut self, integration: &str) -> Step<Self> {
        if let Err(err) = self.form.validate_required() {
            self.error = Some(err.to_string());
            return Step::Stay(self, Vec::new());
        }
        let Some(provider) = self.form.choice("provider").map(str::to_owned) else {
            return Step::Stay(self, Vec::new());
        };
        if self.fields_for.as_deref() != Some(provider.as_str()) {
            self.error = Some(format!("fields for {provider} are still loading"));
            return Step::Stay(self, Vec::new());
        }
        self.error = None;
        let values = self
            .dynamic
            .iter()
            .filter_map(|spec| {
                let text = self.form.text(&spec.key);
                (!text.is_empty()).then(|| (spec.key.clone(), text.to_owned()))
            })
            .collect();
        let request = AddAccountRequest {
            account: self.form.text("account").trim().to_owned(),
            values,
        };
        let effect = Effect::AddProviderAccount {
            integration: integration.to_owned(),
            provider,
            request,
        };
        Step::Stay(self, vec![effect])
    }

    fn rejected(&mut self, err: &ClientError) {
        self.error = apply_client_error(&mut self.form, err);
    }
}
