use std::cell::RefCell;
use std::rc::Rc;

use ask_core::{
    initial_position, is_offscreen, placement_bounds, return_delay_ms, ConfirmState, Cooldown,
    EvasionPlanner, LabelRotation, Point, RandomSource, Size, Viewport, COOLDOWN_MS,
};
use gloo_net::http::Request;
use gloo_timers::future::TimeoutFuture;
use js_sys::{Date, Math, Reflect};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Document, HtmlButtonElement, HtmlElement, HtmlImageElement, MouseEvent, PointerEvent};

const ASK_GIF: &str = "puppy-dog-eyes-please.gif";
const CELEBRATE_GIF: &str = "despicable-me-minions.gif";

const NO_LABELS: [&str; 9] = [
    "No",
    "Nope",
    "Try again",
    "Nice try",
    "Still no",
    "Click Yes",
    "BLEHH",
    "Almost!",
    "HEHE",
];

const SENDING_MESSAGE: &str = "Sending our invitation...";
const SENT_MESSAGE: &str = "Yay! The invitation is on its way.";
const RETRY_MESSAGE: &str = "Hmm, I could not send the email. Please try again.";

fn read_global(key: &str) -> Option<String> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.as_string())
}

/// `Math.random` as the placement RNG.
struct JsRandom;

impl RandomSource for JsRandom {
    fn next_unit(&mut self) -> f64 {
        Math::random()
    }
}

fn element_by_id<T: JsCast>(document: &Document, id: &str) -> Result<T, JsValue> {
    document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("element #{id} not found")))?
        .dyn_into::<T>()
        .map_err(|_| JsValue::from_str(&format!("element #{id} has unexpected type")))
}

struct PageInner {
    document: Document,
    api_base: String,

    gif: HtmlImageElement,
    message: HtmlElement,
    yes_button: HtmlButtonElement,
    no_button: HtmlButtonElement,

    planner: EvasionPlanner,
    cooldown: Cooldown,
    labels: LabelRotation,
    confirm: ConfirmState,

    // Bumped on every placement; a pending forced return only fires if
    // the epoch it captured is still current.
    return_epoch: u64,
}

impl PageInner {
    fn viewport(&self) -> Viewport {
        match self.document.document_element() {
            Some(root) => Viewport {
                width: root.client_width() as f64,
                height: root.client_height() as f64,
            },
            None => Viewport {
                width: 0.0,
                height: 0.0,
            },
        }
    }

    fn button_size(&self) -> Size {
        let rect = self.no_button.get_bounding_client_rect();
        Size {
            width: rect.width(),
            height: rect.height(),
        }
    }

    fn set_position(&mut self, pos: Point) {
        let style = self.no_button.style();
        let _ = style.set_property("left", &format!("{}px", pos.x));
        let _ = style.set_property("top", &format!("{}px", pos.y));
        self.planner.set_position(pos);
    }

    fn rotate_label(&mut self, rng: &mut dyn RandomSource) {
        let label = self.labels.next(rng).to_string();
        self.no_button.set_text_content(Some(&label));
    }

    /// Clamp the last landing back inside the viewport.
    fn ensure_visible(&mut self) {
        let bounds = placement_bounds(self.viewport(), self.button_size(), false);
        let pos = self.planner.clamped(bounds);
        self.set_position(pos);
    }

    fn place_initial(&mut self) {
        let viewport = self.viewport();
        let elem = self.button_size();
        self.set_position(initial_position(viewport, elem));
        self.rotate_label(&mut JsRandom);
        self.ensure_visible();
    }
}

fn move_no_button(inner_rc: &Rc<RefCell<PageInner>>, allow_offscreen: bool, force: bool) {
    let return_delay = {
        let mut inner = inner_rc.borrow_mut();
        let now = Date::now();
        if !force && !inner.cooldown.ready(now) {
            return;
        }
        inner.cooldown.arm(now);
        // Supersede any pending forced return.
        inner.return_epoch = inner.return_epoch.wrapping_add(1);

        let viewport = inner.viewport();
        let elem = inner.button_size();
        let bounds = placement_bounds(viewport, elem, allow_offscreen);
        let mut rng = JsRandom;
        let next = inner.planner.pick(bounds, &mut rng);
        inner.set_position(next);
        inner.rotate_label(&mut rng);

        if allow_offscreen && is_offscreen(next, viewport, elem) {
            Some(return_delay_ms(&mut rng))
        } else {
            None
        }
    };

    if let Some(delay_ms) = return_delay {
        schedule_forced_return(inner_rc.clone(), delay_ms);
    }
}

/// After an off-screen jump, force a visible placement once the delay
/// elapses, unless a newer placement superseded it.
fn schedule_forced_return(inner_rc: Rc<RefCell<PageInner>>, delay_ms: f64) {
    let epoch = inner_rc.borrow().return_epoch;
    spawn_local(async move {
        TimeoutFuture::new(delay_ms as u32).await;
        if inner_rc.borrow().return_epoch != epoch {
            return;
        }
        move_no_button(&inner_rc, false, true);
    });
}

fn setup_no_button_events(inner_rc: &Rc<RefCell<PageInner>>) -> Result<(), JsValue> {
    let no_button = inner_rc.borrow().no_button.clone();

    // pointerenter: only mouse pointers trigger evasion; touch goes
    // through pointerdown.
    {
        let inner_rc = inner_rc.clone();
        let closure = Closure::<dyn FnMut(PointerEvent)>::wrap(Box::new(
            move |event: PointerEvent| {
                if event.pointer_type() == "mouse" {
                    move_no_button(&inner_rc, true, false);
                }
            },
        ));
        no_button
            .add_event_listener_with_callback("pointerenter", closure.as_ref().unchecked_ref())?;
        closure.forget();
    }

    // pointerdown: always escape, bypassing the cooldown.
    {
        let inner_rc = inner_rc.clone();
        let closure = Closure::<dyn FnMut(PointerEvent)>::wrap(Box::new(
            move |event: PointerEvent| {
                move_no_button(&inner_rc, true, true);
                event.prevent_default();
                event.stop_propagation();
            },
        ));
        no_button
            .add_event_listener_with_callback("pointerdown", closure.as_ref().unchecked_ref())?;
        closure.forget();
    }

    // click: swallow anything that still lands on the button.
    {
        let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |event: MouseEvent| {
            event.prevent_default();
        }));
        no_button.add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())?;
        closure.forget();
    }

    Ok(())
}

fn setup_yes_button_events(inner_rc: &Rc<RefCell<PageInner>>) -> Result<(), JsValue> {
    let yes_button = inner_rc.borrow().yes_button.clone();
    let inner_rc = inner_rc.clone();
    let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |_event: MouseEvent| {
        confirm(&inner_rc);
    }));
    yes_button.add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}

fn setup_resize(inner_rc: &Rc<RefCell<PageInner>>) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let inner_rc = inner_rc.clone();
    let closure = Closure::<dyn FnMut()>::wrap(Box::new(move || {
        let mut inner = inner_rc.borrow_mut();
        if inner.planner.last_position().is_some() {
            inner.ensure_visible();
        }
    }));
    window.add_event_listener_with_callback("resize", closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}

fn confirm(inner_rc: &Rc<RefCell<PageInner>>) {
    let api_base = {
        let mut inner = inner_rc.borrow_mut();
        if !inner.confirm.begin() {
            return;
        }
        inner.gif.set_src(CELEBRATE_GIF);
        inner.gif.set_alt("Celebratory reaction");
        inner.message.set_hidden(false);
        inner.message.set_text_content(Some(SENDING_MESSAGE));
        inner.api_base.clone()
    };

    let inner_rc = inner_rc.clone();
    spawn_local(async move {
        let outcome = send_yes(&api_base).await;
        let mut inner = inner_rc.borrow_mut();
        match outcome {
            Ok(()) => {
                inner.confirm.complete(true);
                inner.message.set_text_content(Some(SENT_MESSAGE));
                inner.yes_button.set_disabled(true);
            }
            Err(_) => {
                inner.confirm.complete(false);
                inner.message.set_text_content(Some(RETRY_MESSAGE));
            }
        }
    });
}

/// One best-effort POST; no retries. Non-2xx response text becomes the
/// error.
async fn send_yes(api_base: &str) -> Result<(), String> {
    let url = format!("{}/api/yes", api_base.trim_end_matches('/'));
    let resp = Request::post(&url)
        .json(&serde_json::json!({}))
        .map_err(|e| e.to_string())?
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.ok() {
        let text = resp.text().await.unwrap_or_default();
        if text.is_empty() {
            return Err(format!("request failed with status {}", resp.status()));
        }
        return Err(text);
    }
    Ok(())
}

#[wasm_bindgen]
pub struct ValentinePage {
    inner: Rc<RefCell<PageInner>>,
}

#[wasm_bindgen]
impl ValentinePage {
    /// Wire the page. `api_base` falls back to the `VALENTINE_API_BASE`
    /// global, then to same-origin requests.
    #[wasm_bindgen(constructor)]
    pub fn new(
        gif_id: &str,
        message_id: &str,
        yes_id: &str,
        no_id: &str,
        api_base: Option<String>,
    ) -> Result<ValentinePage, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;

        let gif: HtmlImageElement = element_by_id(&document, gif_id)?;
        let message: HtmlElement = element_by_id(&document, message_id)?;
        let yes_button: HtmlButtonElement = element_by_id(&document, yes_id)?;
        let no_button: HtmlButtonElement = element_by_id(&document, no_id)?;

        let api_base = api_base
            .filter(|base| !base.is_empty())
            .or_else(|| read_global("VALENTINE_API_BASE"))
            .unwrap_or_default();

        let labels = LabelRotation::new(NO_LABELS.iter().map(|s| s.to_string()).collect())
            .map_err(|e| JsValue::from_str(&e))?;

        let inner = Rc::new(RefCell::new(PageInner {
            document,
            api_base,
            gif,
            message,
            yes_button,
            no_button,
            planner: EvasionPlanner::new(),
            cooldown: Cooldown::new(COOLDOWN_MS),
            labels,
            confirm: ConfirmState::default(),
            return_epoch: 0,
        }));

        {
            let mut inner_mut = inner.borrow_mut();
            inner_mut.gif.set_src(ASK_GIF);
            inner_mut.place_initial();
        }
        {
            // One extra pass on the next frame to catch initial layout.
            let inner_clone = inner.clone();
            let raf = Closure::<dyn FnMut(f64)>::wrap(Box::new(move |_| {
                inner_clone.borrow_mut().place_initial();
            }));
            window
                .request_animation_frame(raf.as_ref().unchecked_ref())
                .map_err(|_| JsValue::from_str("failed to schedule initial placement"))?;
            raf.forget();
        }

        setup_no_button_events(&inner)?;
        setup_yes_button_events(&inner)?;
        setup_resize(&inner)?;

        Ok(ValentinePage { inner })
    }

    /// Clamp the evading button back on-screen (call from JS after
    /// layout shifts the resize listener cannot see).
    pub fn ensure_visible(&self) {
        self.inner.borrow_mut().ensure_visible();
    }
}
