//! Applies control-surface commands.
//!
//! Commands arrive over the IPC socket (or from the init script through
//! the CLI utility) and mutate pending state; everything takes effect in
//! the next transaction. Errors are returned to the initiator and change
//! nothing.

use tracing::debug;

use firth_ipc::{AttachMode, Command, Direction, LayoutValue};

use crate::input::InputManager;
use crate::protocols::layout::LayoutTransport;
use crate::root::{Root, TimerRequest};
use crate::seat::SeatHandler;
use crate::stack;
use crate::startup;
use crate::types::{OutputId, Tags, ViewId};

/// Result of a successfully executed command.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Value returned to the initiator, if the command produces one.
    pub value: Option<String>,
    /// Deadline-timer adjustment for the event loop.
    pub timer: TimerRequest,
    /// The compositor should shut down.
    pub exit: bool,
}

impl CommandOutcome {
    fn none() -> Self {
        Self { value: None, timer: TimerRequest::None, exit: false }
    }

    fn timer(timer: TimerRequest) -> Self {
        Self { value: None, timer, exit: false }
    }
}

/// Later timer requests supersede earlier ones.
fn merge(first: TimerRequest, second: TimerRequest) -> TimerRequest {
    match second {
        TimerRequest::None => first,
        other => other,
    }
}

/// Executes one command against the compositor state.
pub fn run_command(
    root: &mut Root,
    input: &mut InputManager,
    handler: &mut dyn SeatHandler,
    transport: &mut dyn LayoutTransport,
    command: Command,
) -> Result<CommandOutcome, String> {
    let exclusive = input.exclusive_client();
    match command {
        Command::SetFocusedTags { tags } => {
            let tags = Tags::new(tags).ok_or("tag mask must not be zero")?;
            let output = focused_output(root, input)?;
            root.output_mut(output).unwrap().set_tags(tags);
            let timer = root.request_arrange(transport);
            let timer =
                merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
            Ok(CommandOutcome::timer(timer))
        }
        Command::ToggleFocusedTags { tags } => {
            let output = focused_output(root, input)?;
            let output = root.output_mut(output).unwrap();
            match output.pending.tags.toggled(tags) {
                Some(toggled) => {
                    output.set_tags(toggled);
                    let timer = root.request_arrange(transport);
                    let timer =
                        merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
                    Ok(CommandOutcome::timer(timer))
                }
                None => {
                    // Toggling away the last focused tag is ignored.
                    debug!(tags, "ignoring tag toggle that would empty the focused tags");
                    Ok(CommandOutcome::none())
                }
            }
        }
        Command::FocusPreviousTags => {
            let output = focused_output(root, input)?;
            let output = root.output_mut(output).unwrap();
            let previous = output.previous_tags;
            output.set_tags(previous);
            let timer = root.request_arrange(transport);
            let timer =
                merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
            Ok(CommandOutcome::timer(timer))
        }
        Command::SetViewTags { tags } => {
            let tags = Tags::new(tags).ok_or("tag mask must not be zero")?;
            let Some(view) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            root.view_mut(view).unwrap().pending.tags = tags;
            let timer = root.request_arrange(transport);
            let timer =
                merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
            Ok(CommandOutcome::timer(timer))
        }
        Command::ToggleViewTags { tags } => {
            let Some(view) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            let view = root.view_mut(view).unwrap();
            match view.pending.tags.toggled(tags) {
                Some(toggled) => {
                    view.pending.tags = toggled;
                    let timer = root.request_arrange(transport);
                    let timer =
                        merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
                    Ok(CommandOutcome::timer(timer))
                }
                None => {
                    debug!(tags, "ignoring tag toggle that would empty the view tags");
                    Ok(CommandOutcome::none())
                }
            }
        }
        Command::SpawnTagmask { tags } => {
            let output = focused_output(root, input)?;
            root.output_mut(output).unwrap().spawn_tagmask = tags;
            Ok(CommandOutcome::none())
        }
        Command::Close => {
            if let Some(view) = input.seat.focused_view() {
                if let Some(view) = root.view_mut(view) {
                    view.close();
                }
            }
            Ok(CommandOutcome::none())
        }
        Command::FocusView { direction } => {
            let output = focused_output(root, input)?;
            let Some(target) =
                neighbor_view(root, output, input.seat.focused_view(), direction)
            else {
                return Ok(CommandOutcome::none());
            };
            let timer = input.seat.focus(root, handler, Some(target), exclusive, transport);
            Ok(CommandOutcome::timer(timer))
        }
        Command::Swap { direction } => {
            let output = focused_output(root, input)?;
            let Some(focused) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            let Some(other) = neighbor_view(root, output, Some(focused), direction) else {
                return Ok(CommandOutcome::none());
            };
            root.output_mut(output).unwrap().stack.swap(focused, other);
            Ok(CommandOutcome::timer(root.request_arrange(transport)))
        }
        Command::Zoom => {
            let output_id = focused_output(root, input)?;
            let output = root.output_mut(output_id).unwrap();
            let tags = output.pending.tags.get();
            let visible: Vec<ViewId> =
                output.stack.iter_pending(tags).map(|(id, _)| id).collect();
            let focused = input.seat.focused_view();

            let target = match (visible.first(), focused) {
                // Bump the focused view unless it is already on top.
                (Some(&first), Some(focused)) if focused != first => Some(focused),
                // Otherwise bump the next one and focus it.
                (Some(_), _) if visible.len() > 1 => Some(visible[1]),
                _ => None,
            };
            let Some(target) = target else { return Ok(CommandOutcome::none()) };

            let view = output.stack.remove(target).unwrap();
            output.stack.push(target, view);
            let timer = root.request_arrange(transport);
            let timer =
                merge(timer, input.seat.focus(root, handler, Some(target), exclusive, transport));
            Ok(CommandOutcome::timer(timer))
        }
        Command::ToggleFloat => {
            let Some(view) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            let view = root.view_mut(view).unwrap();
            view.pending.floating = !view.pending.floating;
            Ok(CommandOutcome::timer(root.request_arrange(transport)))
        }
        Command::ToggleFullscreen => {
            let Some(view) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            let view = root.view_mut(view).unwrap();
            let fullscreen = !view.pending.fullscreen;
            view.pending.fullscreen = fullscreen;
            view.set_fullscreen(fullscreen);
            Ok(CommandOutcome::timer(root.request_arrange(transport)))
        }
        Command::DefaultLayout { namespace } => {
            root.settings.default_layout = Some(namespace);
            Ok(CommandOutcome::timer(root.request_arrange(transport)))
        }
        Command::OutputLayout { namespace } => {
            let output = focused_output(root, input)?;
            root.output_mut(output).unwrap().pending.layout = Some(namespace);
            Ok(CommandOutcome::timer(root.request_arrange(transport)))
        }
        Command::SetLayoutValue { name, value } => {
            let layout = focused_layout(root, input)?;
            let timer = root.set_layout_value(layout, &name, value, transport);
            Ok(CommandOutcome::timer(timer))
        }
        Command::ModLayoutValue { name, value } => {
            let layout = focused_layout(root, input)?;
            let timer = root.mod_layout_value(layout, &name, &value, transport)?;
            Ok(CommandOutcome::timer(timer))
        }
        Command::AttachMode { mode } => {
            root.settings.attach_mode = match mode {
                AttachMode::Top => stack::AttachMode::Top,
                AttachMode::Bottom => stack::AttachMode::Bottom,
            };
            Ok(CommandOutcome::none())
        }
        Command::BorderWidth { width } => {
            root.settings.border_width = width;
            repaint_all(root);
            Ok(CommandOutcome::none())
        }
        Command::BorderColorFocused { color } => {
            root.settings.border_color_focused = color;
            repaint_all(root);
            Ok(CommandOutcome::none())
        }
        Command::BorderColorUnfocused { color } => {
            root.settings.border_color_unfocused = color;
            repaint_all(root);
            Ok(CommandOutcome::none())
        }
        Command::SendToOutput { direction } => {
            let Some(view) = input.seat.focused_view() else {
                return Ok(CommandOutcome::none());
            };
            let forward = direction == Direction::Next;
            let Some(target) = input.seat.neighbor_output(root, forward) else {
                return Ok(CommandOutcome::none());
            };
            let timer = root.send_view_to_output(view, target, transport);
            let timer =
                merge(timer, input.seat.focus(root, handler, None, exclusive, transport));
            Ok(CommandOutcome::timer(timer))
        }
        Command::FocusOutput { direction } => {
            let forward = direction == Direction::Next;
            let Some(target) = input.seat.neighbor_output(root, forward) else {
                return Ok(CommandOutcome::none());
            };
            input.seat.focused_output = Some(target);
            let timer = input.seat.focus(root, handler, None, exclusive, transport);
            Ok(CommandOutcome::timer(timer))
        }
        Command::DeclareMode { name } => {
            input.seat.declare_mode(&name)?;
            Ok(CommandOutcome::none())
        }
        Command::EnterMode { name } => {
            input.seat.enter_mode(&name)?;
            Ok(CommandOutcome::none())
        }
        Command::SetCursorTheme { theme, size } => {
            root.settings.set_cursor_theme(theme, size);
            Ok(CommandOutcome::none())
        }
        Command::Spawn { command } => {
            let pid = startup::spawn_shell(&command).map_err(|err| err.to_string())?;
            Ok(CommandOutcome {
                value: Some(pid.to_string()),
                timer: TimerRequest::None,
                exit: false,
            })
        }
        Command::Exit => Ok(CommandOutcome { value: None, timer: TimerRequest::None, exit: true }),
    }
}

fn focused_output(root: &Root, input: &InputManager) -> Result<OutputId, String> {
    input
        .seat
        .output(root)
        .map(|output| output.id)
        .ok_or_else(|| "no output".to_owned())
}

/// The active layout object on the focused output.
fn focused_layout(
    root: &Root,
    input: &InputManager,
) -> Result<crate::types::LayoutId, String> {
    let output_id = focused_output(root, input)?;
    let output = root.output(output_id).unwrap();
    let default_ns = root.settings.default_layout.as_deref().unwrap_or("");
    root.registry
        .layout_for_output(output, default_ns)
        .ok_or_else(|| "no layout bound to the focused output".to_owned())
}

/// The next/previous view visible on the output's pending tags, wrapping.
fn neighbor_view(
    root: &Root,
    output: OutputId,
    focused: Option<ViewId>,
    direction: Direction,
) -> Option<ViewId> {
    let output = root.output(output)?;
    let tags = output.pending.tags.get();
    let visible: Vec<ViewId> = output.stack.iter_pending(tags).map(|(id, _)| id).collect();
    if visible.is_empty() {
        return None;
    }
    let len = visible.len();
    match focused.and_then(|f| visible.iter().position(|&id| id == f)) {
        Some(pos) => {
            let next = match direction {
                Direction::Next => (pos + 1) % len,
                Direction::Previous => (pos + len - 1) % len,
            };
            (next != pos).then(|| visible[next])
        }
        None => match direction {
            Direction::Next => visible.first().copied(),
            Direction::Previous => visible.last().copied(),
        },
    }
}

fn repaint_all(root: &mut Root) {
    for output in &mut root.outputs {
        output.needs_repaint = true;
    }
}
