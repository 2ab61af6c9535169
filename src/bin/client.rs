use std::any::TypeId;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use iced::widget::{
    button, column, container, mouse_area, progress_bar, row, scrollable, text, text_input,
};
use iced::{time, Alignment, Application, Command, Element, Length, Subscription, Theme};
use log::{debug, error, info, warn};

use health_companion::appointments::{
    self, delete_appointment, display_specialization, qr_payload, AppointmentList, AppointmentTab,
};
use health_companion::auth::{AuthProvider, LocalAuth};
use health_companion::care_guide::{CareGuide, CATEGORIES};
use health_companion::chats::{time_label, ChatFeed, ChatList, ChatUpdate};
use health_companion::client::RemoteStore;
use health_companion::config::AppConfig;
use health_companion::conversation::{mark_read, message_spec, send_message, ChatThread, MessageView};
use health_companion::doctors::{
    doctor_rating, submit_feedback, DoctorDirectory, FeedbackDraft,
};
use health_companion::enrich::Rating;
use health_companion::error::Alert;
use health_companion::heart_rate::{
    history_spec, measured_at_label, save_measurement, BpmStatus, Haptic, HeartRateMeter,
    HoldOutcome,
};
use health_companion::models::{Appointment, HeartRateMeasurement};
use health_companion::random::SystemRng;
use health_companion::scan::{ScanProgress, TICK_INTERVAL};
use health_companion::settings::{self, upload_profile_picture, Settings};
use health_companion::storage::Preferences;
use health_companion::sync::{ListSpec, ListState, ListSync};

/// Moves a model that cannot be cloned through a message and back.
struct Parcel<T>(Arc<Mutex<Option<T>>>);

impl<T> Parcel<T> {
    fn new(value: T) -> Self {
        Parcel(Arc::new(Mutex::new(Some(value))))
    }

    fn take(&self) -> Option<T> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl<T> Clone for Parcel<T> {
    fn clone(&self) -> Self {
        Parcel(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Parcel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Parcel")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Appointments,
    Chats,
    Doctors,
    CareGuide,
    HeartRate,
    Scan,
    Settings,
}

impl Screen {
    const ALL: [Screen; 7] = [
        Screen::Appointments,
        Screen::Chats,
        Screen::Doctors,
        Screen::CareGuide,
        Screen::HeartRate,
        Screen::Scan,
        Screen::Settings,
    ];

    fn label(&self) -> &'static str {
        match self {
            Screen::Appointments => "Appointments",
            Screen::Chats => "Chats",
            Screen::Doctors => "Doctors",
            Screen::CareGuide => "Care Guide",
            Screen::HeartRate => "Heart Rate",
            Screen::Scan => "Skin Scan",
            Screen::Settings => "Settings",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DirectoryOp {
    Load,
    Refresh,
    More,
}

#[derive(Debug, Clone)]
enum Message {
    Connected(Result<RemoteStore, String>),
    Navigate(Screen),
    DismissAlert,

    AppointmentsUpdated(ListState<Appointment>),
    SelectTab(AppointmentTab),
    SelectAppointment(String),
    CloseAppointment,
    RequestDelete(String),
    CancelDelete,
    ConfirmDelete,
    Deleted(Alert),

    ChatsUpdated(ChatUpdate),
    ChatsIdle,
    ChatSearch(String),
    OpenChat { chat_id: String, doctor_id: String },
    CloseChat,
    ChatMarkedRead(Result<usize, String>),
    ThreadUpdated(ListState<MessageView>),
    DraftChanged(String),
    SendMessage,
    MessageSent(Option<Alert>),

    Directory(DirectoryOp),
    DoctorsLoaded(Parcel<DoctorDirectory>),
    DoctorSearch(String),
    OpenDoctor(String),
    CloseDoctor,
    DoctorReviews(Result<(Option<Rating>, usize), String>),
    FeedbackRating(u8),
    FeedbackComment(String),
    SubmitFeedback,
    FeedbackSubmitted(Alert),

    CareSearch(String),
    CareCategory(&'static str),

    HoldStart,
    HoldEnd,
    CountdownTick(Instant),
    HistoryUpdated(ListState<HeartRateMeasurement>),
    MeasurementSaved(Option<Alert>),

    ScanPathChanged(String),
    StartScan,
    RemoveScan,
    ScanTick(Instant),

    ToggleTheme,
    ProfilePathChanged(String),
    UploadProfile,
    ProfileUploaded(Parcel<Settings>, Alert),
}

struct HealthApp {
    config: AppConfig,
    auth: Arc<LocalAuth>,
    store: Option<RemoteStore>,
    status: String,
    screen: Screen,
    alert: Option<Alert>,

    appointments: AppointmentList,
    chats: ChatList,
    thread: Option<ChatThread>,

    /// `None` while a fetch holds the directory.
    doctors: Option<DoctorDirectory>,
    doctor_search: String,
    open_doctor: Option<String>,
    reviews: Option<(Option<Rating>, usize)>,
    feedback: FeedbackDraft,

    care_guide: CareGuide,

    meter: HeartRateMeter,
    history: ListState<HeartRateMeasurement>,

    scan: ScanProgress,
    scan_path: String,

    /// `None` while an upload holds the settings, or when they failed to load.
    settings: Option<Settings>,
    profile_path: String,
}

impl HealthApp {
    fn show(&mut self, alert: Alert) {
        info!("{}: {}", alert.title, alert.message);
        self.alert = Some(alert);
    }

    fn directory(&mut self, op: DirectoryOp) -> Command<Message> {
        let Some(store) = self.store.clone() else {
            return Command::none();
        };
        let Some(mut directory) = self.doctors.take() else {
            debug!("Doctor fetch already running");
            return Command::none();
        };
        Command::perform(
            async move {
                let now = Instant::now();
                let result = match op {
                    DirectoryOp::Load => directory.load(&store, now).await.map(|_| ()),
                    DirectoryOp::Refresh => directory.refresh(&store, now).await,
                    DirectoryOp::More => directory.load_more(&store, now).await,
                };
                if result.is_err() {
                    warn!("Doctor list kept from the previous fetch");
                }
                Parcel::new(directory)
            },
            Message::DoctorsLoaded,
        )
    }

    /// Judges the hold released at `now` and saves a completed reading.
    fn finish_hold(&mut self, now: Instant) -> Command<Message> {
        match self.meter.release(now, Utc::now()) {
            HoldOutcome::Ignored => {}
            HoldOutcome::Rejected(alert) => self.show(alert),
            HoldOutcome::Completed { bpm } => {
                debug!("Haptic: success");
                let Some(store) = self.store.clone() else {
                    error!("Not connected; measurement of {} BPM not saved", bpm);
                    self.show(Alert::failed("save measurement"));
                    return Command::none();
                };
                let auth = Arc::clone(&self.auth);
                return Command::perform(
                    async move { save_measurement(&store, auth.as_ref(), bpm).await },
                    Message::MeasurementSaved,
                );
            }
        }
        Command::none()
    }

    fn load_reviews(&self, doctor_id: String) -> Command<Message> {
        let Some(store) = self.store.clone() else {
            return Command::none();
        };
        Command::perform(
            async move {
                doctor_rating(&store, &doctor_id)
                    .await
                    .map_err(|e| e.to_string())
            },
            Message::DoctorReviews,
        )
    }
}

impl Application for HealthApp {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = AppConfig;

    fn new(config: AppConfig) -> (Self, Command<Message>) {
        let auth = Arc::new(LocalAuth::new(config.session.clone()));
        let settings = Preferences::new(&config.preferences_path)
            .and_then(Settings::load)
            .map_err(|e| error!("Failed to load preferences: {}", e))
            .ok();
        let addr = config.server_addr.clone();

        let app = HealthApp {
            config,
            auth,
            store: None,
            status: "Connecting...".to_string(),
            screen: Screen::Appointments,
            alert: None,
            appointments: AppointmentList::default(),
            chats: ChatList::default(),
            thread: None,
            doctors: Some(DoctorDirectory::new(Box::new(SystemRng::new()))),
            doctor_search: String::new(),
            open_doctor: None,
            reviews: None,
            feedback: FeedbackDraft::default(),
            care_guide: CareGuide::default(),
            meter: HeartRateMeter::new(Box::new(SystemRng::new())),
            history: ListState {
                items: Vec::new(),
                loading: true,
                error: None,
            },
            scan: ScanProgress::default(),
            scan_path: String::new(),
            settings,
            profile_path: String::new(),
        };
        let connect = Command::perform(
            async move { RemoteStore::connect(&addr).await.map_err(|e| e.to_string()) },
            Message::Connected,
        );
        (app, connect)
    }

    fn title(&self) -> String {
        String::from("Health Companion")
    }

    fn theme(&self) -> Theme {
        match self.settings.as_ref().map(Settings::theme) {
            Some(settings::Theme::Dark) => Theme::Dark,
            _ => Theme::Light,
        }
    }

    fn update(&mut self, message: Message) -> Command<Message> {
        match message {
            Message::Connected(Ok(store)) => {
                self.status = format!("Connected to {}", self.config.server_addr);
                self.store = Some(store);
                if self.screen == Screen::Doctors {
                    return self.directory(DirectoryOp::Load);
                }
            }
            Message::Connected(Err(e)) => {
                error!("Failed to connect: {}", e);
                self.status = format!("Error: {}", e);
            }
            Message::Navigate(screen) => {
                self.screen = screen;
                if screen == Screen::Doctors {
                    return self.directory(DirectoryOp::Load);
                }
            }
            Message::DismissAlert => self.alert = None,

            Message::AppointmentsUpdated(state) => self.appointments.apply(state),
            Message::SelectTab(tab) => self.appointments.select_tab(tab),
            Message::SelectAppointment(id) => self.appointments.select(&id),
            Message::CloseAppointment => self.appointments.clear_selection(),
            Message::RequestDelete(id) => self.appointments.request_delete(&id),
            Message::CancelDelete => self.appointments.cancel_delete(),
            Message::ConfirmDelete => {
                let (Some(store), Some(id)) = (self.store.clone(), self.appointments.confirm_delete())
                else {
                    return Command::none();
                };
                return Command::perform(
                    async move { delete_appointment(&store, &id).await },
                    Message::Deleted,
                );
            }
            Message::Deleted(alert) => self.show(alert),

            Message::ChatsUpdated(update) => self.chats.apply(update),
            Message::ChatsIdle => self.chats.set_idle(),
            Message::ChatSearch(query) => self.chats.set_search(query),
            Message::OpenChat { chat_id, doctor_id } => {
                self.thread = Some(ChatThread::new(chat_id.clone(), doctor_id.clone()));
                let Some(store) = self.store.clone() else {
                    return Command::none();
                };
                return Command::perform(
                    async move {
                        mark_read(&store, &chat_id, &doctor_id)
                            .await
                            .map_err(|e| e.to_string())
                    },
                    Message::ChatMarkedRead,
                );
            }
            Message::CloseChat => self.thread = None,
            Message::ChatMarkedRead(Ok(count)) => debug!("{} messages marked read", count),
            Message::ChatMarkedRead(Err(e)) => error!("Error marking messages as read: {}", e),
            Message::ThreadUpdated(state) => {
                if let Some(thread) = self.thread.as_mut() {
                    thread.apply(state);
                }
            }
            Message::DraftChanged(text) => {
                if let Some(thread) = self.thread.as_mut() {
                    thread.set_draft(text);
                }
            }
            Message::SendMessage => {
                if self.thread.is_none() {
                    return Command::none();
                }
                let Some(store) = self.store.clone() else {
                    self.show(Alert::failed("send message"));
                    return Command::none();
                };
                let Some(thread) = self.thread.as_mut() else {
                    return Command::none();
                };
                let Some(text) = thread.take_draft() else {
                    return Command::none();
                };
                let chat_id = thread.chat_id().to_string();
                let doctor_id = thread.doctor_id().to_string();
                let auth = Arc::clone(&self.auth);
                return Command::perform(
                    async move { send_message(&store, auth.as_ref(), &chat_id, &doctor_id, &text).await },
                    Message::MessageSent,
                );
            }
            Message::MessageSent(Some(alert)) => self.show(alert),
            Message::MessageSent(None) => {}

            Message::Directory(op) => return self.directory(op),
            Message::DoctorsLoaded(parcel) => {
                if let Some(mut directory) = parcel.take() {
                    directory.set_search(self.doctor_search.clone());
                    self.doctors = Some(directory);
                }
            }
            Message::DoctorSearch(query) => {
                self.doctor_search = query.clone();
                if let Some(directory) = self.doctors.as_mut() {
                    directory.set_search(query);
                }
            }
            Message::OpenDoctor(id) => {
                self.open_doctor = Some(id.clone());
                self.reviews = None;
                self.feedback = FeedbackDraft::default();
                return self.load_reviews(id);
            }
            Message::CloseDoctor => {
                self.open_doctor = None;
                self.reviews = None;
            }
            Message::DoctorReviews(Ok(reviews)) => self.reviews = Some(reviews),
            Message::DoctorReviews(Err(e)) => error!("Error fetching reviews: {}", e),
            Message::FeedbackRating(rating) => self.feedback.rating = rating,
            Message::FeedbackComment(comment) => self.feedback.comment = comment,
            Message::SubmitFeedback => {
                let (Some(store), Some(doctor_id)) = (self.store.clone(), self.open_doctor.clone())
                else {
                    return Command::none();
                };
                let auth = Arc::clone(&self.auth);
                let draft = self.feedback.clone();
                return Command::perform(
                    async move { submit_feedback(&store, auth.as_ref(), &doctor_id, &draft).await },
                    Message::FeedbackSubmitted,
                );
            }
            Message::FeedbackSubmitted(alert) => {
                let submitted = alert.is_success();
                self.show(alert);
                if submitted {
                    self.feedback = FeedbackDraft::default();
                    if let Some(id) = self.open_doctor.clone() {
                        return self.load_reviews(id);
                    }
                }
            }

            Message::CareSearch(query) => self.care_guide.set_search(query),
            Message::CareCategory(category) => self.care_guide.set_category(category),

            Message::HoldStart => {
                if let Some(Haptic::Impact) = self.meter.press(Instant::now()) {
                    debug!("Haptic: impact");
                }
            }
            Message::HoldEnd => return self.finish_hold(Instant::now()),
            Message::CountdownTick(_) => {
                self.meter.tick();
            }
            Message::HistoryUpdated(state) => self.history = state,
            Message::MeasurementSaved(Some(alert)) => self.show(alert),
            Message::MeasurementSaved(None) => {}

            Message::ScanPathChanged(path) => self.scan_path = path,
            Message::StartScan => {
                let path = PathBuf::from(self.scan_path.trim());
                if self.scan_path.trim().is_empty() || !path.is_file() {
                    self.show(Alert::error("No image selected"));
                } else {
                    self.scan.select(path);
                }
            }
            Message::RemoveScan => self.scan.remove(),
            Message::ScanTick(now) => self.scan.tick(now),

            Message::ToggleTheme => {
                if let Some(settings) = self.settings.as_mut() {
                    if let Err(e) = settings.toggle_theme() {
                        error!("Failed to save theme: {}", e);
                    }
                }
            }
            Message::ProfilePathChanged(path) => self.profile_path = path,
            Message::UploadProfile => {
                let Some(store) = self.store.clone() else {
                    return Command::none();
                };
                let Some(mut settings) = self.settings.take() else {
                    return Command::none();
                };
                let auth = Arc::clone(&self.auth);
                let path = PathBuf::from(self.profile_path.trim());
                return Command::perform(
                    async move {
                        let alert = match tokio::fs::read(&path).await {
                            Ok(bytes) => {
                                let now_ms = Utc::now().timestamp_millis();
                                upload_profile_picture(
                                    &store,
                                    &store,
                                    auth.as_ref(),
                                    &mut settings,
                                    bytes,
                                    now_ms,
                                )
                                .await
                            }
                            Err(e) => {
                                error!("Failed to read {}: {}", path.display(), e);
                                Alert::error("Failed to upload image")
                            }
                        };
                        (Parcel::new(settings), alert)
                    },
                    |(settings, alert)| Message::ProfileUploaded(settings, alert),
                );
            }
            Message::ProfileUploaded(settings, alert) => {
                self.settings = settings.take();
                self.show(alert);
            }
        }
        Command::none()
    }

    fn view(&self) -> Element<Message> {
        let nav = row(Screen::ALL
            .iter()
            .map(|screen| {
                let label = if *screen == Screen::Chats && self.chats.unread_count() > 0 {
                    format!("{} ({})", screen.label(), self.chats.unread_count())
                } else {
                    screen.label().to_string()
                };
                button(text(label))
                    .on_press_maybe((*screen != self.screen).then_some(Message::Navigate(*screen)))
                    .padding(8)
                    .into()
            })
            .collect::<Vec<_>>())
        .spacing(8);

        let body = match self.screen {
            Screen::Appointments => self.view_appointments(),
            Screen::Chats => self.view_chats(),
            Screen::Doctors => self.view_doctors(),
            Screen::CareGuide => self.view_care_guide(),
            Screen::HeartRate => self.view_heart_rate(),
            Screen::Scan => self.view_scan(),
            Screen::Settings => self.view_settings(),
        };

        let mut page = column![nav].spacing(16).padding(20);
        if let Some(alert) = &self.alert {
            page = page.push(
                row![
                    text(format!("{}: {}", alert.title, alert.message)).size(16),
                    button("OK").on_press(Message::DismissAlert).padding(6),
                ]
                .spacing(12)
                .align_items(Alignment::Center),
            );
        }
        page = page.push(scrollable(body).height(Length::Fill));
        page = page.push(text(&self.status).size(14));

        container(page)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn subscription(&self) -> Subscription<Message> {
        let mut subscriptions = Vec::new();
        if let Some(store) = &self.store {
            struct AppointmentFeed;
            struct HistoryFeed;
            subscriptions.push(list_feed(
                TypeId::of::<AppointmentFeed>(),
                store.clone(),
                Arc::clone(&self.auth),
                appointments::list_spec(),
                Message::AppointmentsUpdated,
            ));
            subscriptions.push(list_feed(
                TypeId::of::<HistoryFeed>(),
                store.clone(),
                Arc::clone(&self.auth),
                history_spec(),
                Message::HistoryUpdated,
            ));
            subscriptions.push(chat_feed(store.clone(), Arc::clone(&self.auth)));
            if let Some(thread) = &self.thread {
                struct ThreadFeed;
                subscriptions.push(list_feed(
                    (TypeId::of::<ThreadFeed>(), thread.chat_id().to_string()),
                    store.clone(),
                    Arc::clone(&self.auth),
                    message_spec(thread.chat_id()),
                    Message::ThreadUpdated,
                ));
            }
        }
        if self.meter.is_measuring() {
            subscriptions.push(time::every(Duration::from_secs(1)).map(Message::CountdownTick));
        }
        if self.scan.is_busy() {
            subscriptions.push(time::every(TICK_INTERVAL).map(Message::ScanTick));
        }
        Subscription::batch(subscriptions)
    }
}

impl HealthApp {
    fn view_appointments(&self) -> Element<Message> {
        let list = &self.appointments;
        let tabs = row(list
            .counts()
            .into_iter()
            .map(|(tab, count)| {
                button(text(format!("{} ({})", tab.label(), count)))
                    .on_press(Message::SelectTab(tab))
                    .padding(6)
                    .into()
            })
            .collect::<Vec<_>>())
        .spacing(6);

        let mut content = column![text("My Appointments").size(26), tabs].spacing(12);

        if let Some(id) = list.pending_delete() {
            content = content.push(
                row![
                    text(format!("Delete appointment {}?", id)),
                    button("Delete").on_press(Message::ConfirmDelete).padding(6),
                    button("Cancel").on_press(Message::CancelDelete).padding(6),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }

        if let Some(appointment) = list.selected() {
            content = content.push(
                column![
                    text(&appointment.doctor_name).size(20),
                    text(display_specialization(appointment)),
                    text(format!("{} at {}", appointment.date, appointment.time)),
                    text(format!("Status: {}", appointment.status.as_str())),
                    text(format!("Patient: {}", appointment.user_name)),
                    text(format!("QR: {}", qr_payload(appointment))).size(12),
                    button("Close").on_press(Message::CloseAppointment).padding(6),
                ]
                .spacing(6),
            );
        }

        if list.state().loading {
            return content.push(text("Loading appointments...")).into();
        }
        let visible = list.visible();
        if visible.is_empty() {
            return content
                .push(text(list.selected_tab().empty_message()))
                .into();
        }
        for appointment in visible {
            content = content.push(
                row![
                    column![
                        text(&appointment.doctor_name).size(18),
                        text(display_specialization(appointment)).size(14),
                        text(format!("{} | {}", appointment.date, appointment.time)).size(14),
                    ]
                    .spacing(2)
                    .width(Length::Fill),
                    text(appointment.status.as_str()),
                    button("Details")
                        .on_press(Message::SelectAppointment(appointment.id.clone()))
                        .padding(6),
                    button("Delete")
                        .on_press(Message::RequestDelete(appointment.id.clone()))
                        .padding(6),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }
        content.into()
    }

    fn view_chats(&self) -> Element<Message> {
        if let Some(thread) = &self.thread {
            return self.view_thread(thread);
        }
        let mut content = column![
            text("Messages").size(26),
            text_input("Search chats", self.chats.search()).on_input(Message::ChatSearch),
        ]
        .spacing(12);

        if self.chats.loading() {
            return content.push(text("Loading chats...")).into();
        }
        let visible = self.chats.visible();
        if visible.is_empty() {
            return content.push(text("No conversations yet")).into();
        }
        let now = Local::now();
        for chat in visible {
            let when = chat
                .last_message_time
                .map(|t| time_label(t, now))
                .unwrap_or_default();
            let marker = if chat.unread { "● " } else { "" };
            content = content.push(
                row![
                    column![
                        text(format!("{}{}", marker, chat.doctor.full_name)).size(18),
                        text(&chat.last_message).size(14),
                    ]
                    .spacing(2)
                    .width(Length::Fill),
                    text(when).size(12),
                    button("Open")
                        .on_press(Message::OpenChat {
                            chat_id: chat.id.clone(),
                            doctor_id: chat.doctor.uid.clone(),
                        })
                        .padding(6),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }
        content.into()
    }

    fn view_thread<'a>(&'a self, thread: &'a ChatThread) -> Element<'a, Message> {
        let doctor = self
            .chats
            .chats()
            .iter()
            .find(|chat| chat.id == thread.chat_id())
            .map(|chat| chat.doctor.full_name.as_str())
            .unwrap_or("Doctor");

        let mut content = column![row![
            button("Back").on_press(Message::CloseChat).padding(6),
            text(doctor).size(22),
        ]
        .spacing(12)
        .align_items(Alignment::Center)]
        .spacing(8);

        if thread.loading() {
            content = content.push(text("Loading messages..."));
        } else if let Some(error) = thread.error() {
            content = content.push(text(format!("Failed to load messages: {}", error)));
        } else if thread.messages().is_empty() {
            content = content.push(text("No messages yet"));
        }

        let now = Local::now();
        for message in thread.messages().iter().rev() {
            let when = message
                .timestamp
                .map(|t| time_label(t, now))
                .unwrap_or_default();
            let line = if message.mine {
                format!("You: {}  ({} | {})", message.text, when, message.status.as_str())
            } else {
                format!("{}: {}  ({})", doctor, message.text, when)
            };
            content = content.push(text(line).size(15));
        }

        content
            .push(
                row![
                    text_input("Type a message", thread.draft())
                        .on_input(Message::DraftChanged)
                        .on_submit(Message::SendMessage),
                    button("Send").on_press(Message::SendMessage).padding(6),
                ]
                .spacing(10),
            )
            .into()
    }

    fn view_doctors(&self) -> Element<Message> {
        let mut content = column![
            text("Find a Doctor").size(26),
            row![
                text_input("Search by name, address or specialization", &self.doctor_search)
                    .on_input(Message::DoctorSearch),
                button("Refresh")
                    .on_press(Message::Directory(DirectoryOp::Refresh))
                    .padding(6),
            ]
            .spacing(10),
        ]
        .spacing(12);

        let Some(directory) = &self.doctors else {
            return content.push(text("Loading doctors...")).into();
        };

        if let Some(card) = self.open_doctor.as_deref().and_then(|id| directory.find(id)) {
            let reviews = match &self.reviews {
                Some((Some(rating), count)) => format!("Rating {} from {} reviews", rating, count),
                Some((None, _)) => "No reviews yet".to_string(),
                None => "Loading reviews...".to_string(),
            };
            let stars = row((1..=5u8)
                .map(|n| {
                    let label = if n <= self.feedback.rating { "★" } else { "☆" };
                    button(text(label))
                        .on_press(Message::FeedbackRating(n))
                        .padding(4)
                        .into()
                })
                .collect::<Vec<_>>())
            .spacing(4);
            content = content.push(
                column![
                    text(&card.doctor.full_name).size(22),
                    text(card.doctor.specialization.as_deref().unwrap_or("")),
                    text(reviews),
                    stars,
                    text_input("Share your experience", &self.feedback.comment)
                        .on_input(Message::FeedbackComment),
                    row![
                        button("Submit Feedback")
                            .on_press(Message::SubmitFeedback)
                            .padding(6),
                        button("Close").on_press(Message::CloseDoctor).padding(6),
                    ]
                    .spacing(10),
                ]
                .spacing(8),
            );
        }

        for card in directory.visible() {
            let experience = card
                .doctor
                .experience_years
                .as_deref()
                .map(|years| format!("{} years", years))
                .unwrap_or_else(|| "N/A".to_string());
            content = content.push(
                row![
                    column![
                        text(&card.doctor.full_name).size(18),
                        text(card.doctor.specialization.as_deref().unwrap_or("")).size(14),
                        text(card.doctor.address.as_deref().unwrap_or("")).size(14),
                        text(format!("Experience: {} | Fee: {}", experience, card.fee_label()))
                            .size(14),
                    ]
                    .spacing(2)
                    .width(Length::Fill),
                    text(format!("★ {}", card.rating)),
                    button("View")
                        .on_press(Message::OpenDoctor(card.doctor.id.clone()))
                        .padding(6),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }

        if directory.loading() {
            content = content.push(text("Loading doctors..."));
        } else if !directory.exhausted() {
            content = content.push(
                button("Load more")
                    .on_press(Message::Directory(DirectoryOp::More))
                    .padding(6),
            );
        }
        content.into()
    }

    fn view_care_guide(&self) -> Element<Message> {
        let categories = row(CATEGORIES
            .iter()
            .map(|category| {
                let on_press = (*category != self.care_guide.category())
                    .then_some(Message::CareCategory(*category));
                button(text(*category)).on_press_maybe(on_press).padding(6).into()
            })
            .collect::<Vec<_>>())
        .spacing(6);

        let mut content = column![
            text("Care Guide").size(26),
            text_input("Search conditions", self.care_guide.search())
                .on_input(Message::CareSearch),
            categories,
            text(self.care_guide.summary()).size(14),
        ]
        .spacing(12);

        let visible = self.care_guide.visible();
        if visible.is_empty() {
            return content
                .push(text("Try adjusting your search terms or category filter"))
                .into();
        }
        for disease in visible {
            content = content.push(
                column![
                    text(&disease.name).size(18),
                    text(&disease.description).size(14),
                    text(&disease.category).size(12),
                ]
                .spacing(2),
            );
        }
        content.into()
    }

    fn view_heart_rate(&self) -> Element<Message> {
        let prompt = if self.meter.is_measuring() {
            format!("Measuring... {}s", self.meter.time_left())
        } else {
            "Press and hold to measure".to_string()
        };
        let pad = mouse_area(container(text(prompt).size(22)).padding(40))
            .on_press(Message::HoldStart)
            .on_release(Message::HoldEnd);

        let reading = match self.meter.bpm() {
            Some(bpm) => format!("{} BPM", bpm),
            None => "-- BPM".to_string(),
        };
        let mut content = column![
            text("Heart Rate").size(26),
            pad,
            text(reading).size(32),
            text(self.meter.status().label()),
            text("History").size(20),
        ]
        .spacing(12)
        .align_items(Alignment::Center);

        if self.history.loading {
            return content.push(text("Loading history...")).into();
        }
        if self.history.items.is_empty() {
            return content.push(text("No measurements yet")).into();
        }
        for measurement in &self.history.items {
            content = content.push(text(format!(
                "{} BPM | {} | {}",
                measurement.bpm,
                BpmStatus::of(Some(measurement.bpm)).label(),
                measured_at_label(measurement)
            )));
        }
        content.into()
    }

    fn view_scan(&self) -> Element<Message> {
        let upload = button(text(self.scan.button_label()))
            .on_press_maybe((!self.scan.is_busy()).then_some(Message::StartScan))
            .padding(8);
        let mut content = column![
            text("Skin Scan").size(26),
            text_input("Path to a skin photo", &self.scan_path).on_input(Message::ScanPathChanged),
            upload,
        ]
        .spacing(12);

        if let Some(image) = self.scan.image() {
            content = content.push(
                row![
                    text(image.display().to_string()),
                    button("Remove").on_press(Message::RemoveScan).padding(6),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }
        if self.scan.is_busy() {
            content = content
                .push(progress_bar(0.0..=100.0, self.scan.progress()))
                .push(text(format!(
                    "{} {:.0}%",
                    self.scan.status_text(),
                    self.scan.progress()
                )));
        }
        content.into()
    }

    fn view_settings(&self) -> Element<Message> {
        let session = self.auth.current_session();
        let who = session
            .as_ref()
            .map(|s| {
                s.display_name
                    .clone()
                    .or_else(|| s.email.clone())
                    .unwrap_or_else(|| s.uid.clone())
            })
            .unwrap_or_else(|| "Not signed in".to_string());

        let mut content = column![text("Settings").size(26), text(who).size(18)].spacing(12);

        let Some(settings) = &self.settings else {
            return content.push(text("Preferences unavailable")).into();
        };
        let dark = settings.theme() == settings::Theme::Dark;
        content = content.push(
            button(text(if dark { "Dark mode: on" } else { "Dark mode: off" }))
                .on_press(Message::ToggleTheme)
                .padding(6),
        );
        content = content.push(text(format!(
            "Profile picture: {}",
            settings.profile_image_uri().unwrap_or("none")
        )));
        let can_upload = !self.profile_path.trim().is_empty()
            && Path::new(self.profile_path.trim()).is_file()
            && session.is_some();
        content
            .push(
                row![
                    text_input("Path to a new profile picture", &self.profile_path)
                        .on_input(Message::ProfilePathChanged),
                    button("Upload")
                        .on_press_maybe(can_upload.then_some(Message::UploadProfile))
                        .padding(6),
                ]
                .spacing(10),
            )
            .into()
    }
}

enum ListFeed<T> {
    Starting(RemoteStore, Arc<LocalAuth>, ListSpec<T>),
    Running(ListSync<T>),
    Ended,
}

/// Streams every published state of one live list into the app.
fn list_feed<I, T>(
    id: I,
    store: RemoteStore,
    auth: Arc<LocalAuth>,
    spec: ListSpec<T>,
    to_message: fn(ListState<T>) -> Message,
) -> Subscription<Message>
where
    I: Hash + 'static,
    T: Clone + Send + 'static,
{
    iced::subscription::unfold(id, ListFeed::Starting(store, auth, spec), move |feed| async move {
        match feed {
            ListFeed::Starting(store, auth, spec) => {
                let sync = ListSync::start(&store, auth.as_ref(), spec);
                let state = sync.state().clone();
                let next = if sync.is_active() {
                    ListFeed::Running(sync)
                } else {
                    ListFeed::Ended
                };
                (to_message(state), next)
            }
            ListFeed::Running(mut sync) => {
                let next = sync.next().await.cloned();
                match next {
                    Some(state) => (to_message(state), ListFeed::Running(sync)),
                    None => (to_message(sync.state().clone()), ListFeed::Ended),
                }
            }
            ListFeed::Ended => std::future::pending().await,
        }
    })
}

enum ChatStream {
    Starting(RemoteStore, Arc<LocalAuth>),
    Running(RemoteStore, ChatFeed),
    Ended,
}

fn chat_feed(store: RemoteStore, auth: Arc<LocalAuth>) -> Subscription<Message> {
    struct ChatSubscription;

    iced::subscription::unfold(
        TypeId::of::<ChatSubscription>(),
        ChatStream::Starting(store, auth),
        |stream| async move {
            let (store, mut feed) = match stream {
                ChatStream::Starting(store, auth) => {
                    let feed = ChatFeed::start(&store, auth.as_ref());
                    if !feed.is_active() {
                        return (Message::ChatsIdle, ChatStream::Ended);
                    }
                    (store, feed)
                }
                ChatStream::Running(store, feed) => (store, feed),
                ChatStream::Ended => return std::future::pending().await,
            };
            match feed.next(&store).await {
                Some(update) => (Message::ChatsUpdated(update), ChatStream::Running(store, feed)),
                None => (Message::ChatsUpdated(ChatUpdate::Failed), ChatStream::Ended),
            }
        },
    )
}

fn main() -> iced::Result {
    let config = AppConfig::from_env();
    env_logger::init();
    HealthApp::run(iced::Settings::with_flags(config))
}
