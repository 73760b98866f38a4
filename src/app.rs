use std::{
    mem, process,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::bail;
use bytemuck::NoUninit;
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt, TextureDataOrder},
    Adapter, Backends, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BlendState,
    Buffer, BufferBindingType, BufferDescriptor, BufferUsages, Color, ColorTargetState,
    ColorWrites, CommandEncoder, CompositeAlphaMode, Device, DeviceDescriptor, Extent3d,
    FilterMode, FragmentState, InstanceDescriptor, LoadOp, MemoryHints, MultisampleState,
    Operations, PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState,
    PrimitiveTopology, Queue, RenderPass, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, RequestAdapterOptions, Sampler, SamplerBindingType,
    SamplerDescriptor, ShaderModuleDescriptor, ShaderSource, ShaderStages, Surface, SurfaceError,
    SurfaceTarget, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType,
    TextureUsages, TextureView, TextureViewDimension, VertexAttribute, VertexBufferLayout,
    VertexState, VertexStepMode,
};
use winit::{
    application::ApplicationHandler,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowId, WindowLevel},
};

use crate::{
    cmd::Cmd,
    config::{Brush, BrushMode, Config},
    geometry::{self, RibbonBuilder, BRUSH_MASK_SIZE},
    math::{vec2, Vec2f, Vec2u},
    stroke::{self, Dab, StrokeEngine},
};

const ALPHA_MODE: CompositeAlphaMode = CompositeAlphaMode::PreMultiplied;

/// The driver sends nothing when the pen leaves the detection range, so the
/// cursor ghost is dropped after this long without a packet.
const OUT_OF_RANGE_TIMEOUT: Duration = Duration::from_millis(100);

const RIBBON_VERTEX_ATTRS: [VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

pub struct App {
    instance: wgpu::Instance,
    win: Option<Win>,
    config: Config,
}

struct Gpu {
    adapter: Adapter,
    device: Device,
    queue: Queue,
    /// Format of the window surface, used as the format of every render target.
    format: TextureFormat,

    stamp_pipeline: RenderPipeline,
    ribbon_pipeline: RenderPipeline,
    sampler: Sampler,

    pass_bgl: BindGroupLayout,
    texture_bgl: BindGroupLayout,
    instances_bgl: BindGroupLayout,
}

impl Gpu {
    fn new(
        instance: &wgpu::Instance,
        surface: &Surface<'_>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            compatible_surface: Some(surface),
            ..Default::default()
        }));
        let Some(adapter) = adapter else {
            bail!("failed to find a supported graphics adapter")
        };

        let surface_caps = surface.get_capabilities(&adapter);
        if !surface_caps.alpha_modes.contains(&ALPHA_MODE) {
            bail!(
                "surface does not support required alpha compositing mode {:?} (supported: {:?})",
                ALPHA_MODE,
                surface_caps.alpha_modes,
            );
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor {
                memory_hints: MemoryHints::MemoryUsage,
                ..Default::default()
            },
            None,
        ))?;

        let config = surface
            .get_default_config(&adapter, width, height)
            .expect("adapter does not support surface");

        // Shader
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("shader"),
            source: ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        // BGLs
        let pass_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("pass"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    count: None,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    count: None,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                },
            ],
        });
        let texture_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("texture"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                count: None,
                visibility: ShaderStages::VERTEX_FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
            }],
        });
        let instances_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("instances"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                count: None,
                visibility: ShaderStages::VERTEX_FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            }],
        });

        // Pipelines. Both write premultiplied alpha into the surface format:
        // one instanced textured quad per dab/drawable, and a plain triangle
        // list for the ribbon.
        let stamp_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("stamp_pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("stamp_pipeline"),
                bind_group_layouts: &[&pass_bgl, &texture_bgl, &instances_bgl],
                ..Default::default()
            })),
            vertex: VertexState {
                module: &shader,
                entry_point: "vertex",
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fragment",
                compilation_options: PipelineCompilationOptions::default(),
                targets: &[Some(ColorTargetState {
                    format: config.format,
                    blend: Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: ColorWrites::all(),
                })],
            }),
            multiview: None,
            cache: None,
        });
        let ribbon_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("ribbon_pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("ribbon_pipeline"),
                bind_group_layouts: &[&pass_bgl],
                ..Default::default()
            })),
            vertex: VertexState {
                module: &shader,
                entry_point: "ribbon_vertex",
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[VertexBufferLayout {
                    array_stride: mem::size_of::<Vec2f>() as u64,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &RIBBON_VERTEX_ATTRS,
                }],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "ribbon_fragment",
                compilation_options: PipelineCompilationOptions::default(),
                targets: &[Some(ColorTargetState {
                    format: config.format,
                    blend: Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: ColorWrites::all(),
                })],
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        Ok(Gpu {
            adapter,
            device,
            queue,
            format: config.format,
            stamp_pipeline,
            ribbon_pipeline,
            sampler,
            pass_bgl,
            texture_bgl,
            instances_bgl,
        })
    }
}

/// Per-render-target uniforms (sampler + target size), bound at group 0 of
/// every pass. Created once per target so passes never overwrite each
/// other's uniform data within a submission.
struct PassUniforms {
    bg: BindGroup,
}

impl PassUniforms {
    fn new(gpu: &Gpu, render_target_size: Vec2u) -> Self {
        let buf = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("pass_uniforms"),
            contents: bytemuck::bytes_of(&Uniforms { render_target_size }),
            usage: BufferUsages::UNIFORM,
        });
        let bg = gpu.device.create_bind_group(&BindGroupDescriptor {
            label: Some("pass"),
            layout: &gpu.pass_bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Sampler(&gpu.sampler),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Buffer(buf.as_entire_buffer_binding()),
                },
            ],
        });
        Self { bg }
    }
}

struct Win {
    window: Arc<Window>,
    surface: Surface<'static>,
    gpu: Gpu,

    canvas: Drawable,
    stamps: Drawable,
    cursor_draw: Drawable,
    ribbon: Mesh,
    canvas_pass: PassUniforms,
    surface_pass: PassUniforms,

    cursor_pos: Option<Vec2f>,
    engine: StrokeEngine,
    ribbon_builder: RibbonBuilder,
    /// Dabs synthesized since the last presentation, waiting to be baked
    /// onto the canvas (stamped mode).
    pending_dabs: Vec<Dab>,

    brush: Brush,
    scale: f32,
    clock: FrameClock,
    last_pen: Instant,
}

impl Win {
    fn recreate_swapchain(&mut self) {
        let res = self.window.inner_size();

        let mut config = self
            .surface
            .get_default_config(&self.gpu.adapter, res.width, res.height)
            .expect("adapter does not support surface");
        config.alpha_mode = ALPHA_MODE;

        log::debug!(
            "configuring window surface for {}x{} (format: {:?}, present mode: {:?}, alpha mode: {:?})",
            res.width,
            res.height,
            config.format,
            config.present_mode,
            config.alpha_mode,
        );

        self.surface.configure(&self.gpu.device, &config);
        self.surface_pass = PassUniforms::new(&self.gpu, vec2(res.width, res.height));
    }

    /// Handles one pen packet: maps it into canvas space and runs it through
    /// the stroke pipeline.
    fn pen_move(&mut self, position: Vec2f, pressure: f32) {
        self.last_pen = Instant::now();

        // Window geometry is re-queried for every packet; the window can
        // move between two packets of the same batch.
        let size = self.window.inner_size();
        let win_size = vec2(size.width as f32, size.height as f32);
        let win_pos = match self.window.outer_position() {
            Ok(pos) => vec2(pos.x as f32, pos.y as f32),
            Err(_) => vec2(0.0, 0.0),
        };

        // Position is in range 0..1 with the top left being 0,0; the tablet
        // spans the window area.
        let raw = win_pos + position * win_size;
        let pos = stroke::canvas_from_screen(raw, win_pos, win_size, self.scale);
        self.cursor_pos = Some(pos);

        if pressure == 0.0 {
            if let Some(stroke) = self.engine.pen_up() {
                log::debug!("finished stroke with {} dabs", stroke.dabs().len());
            }
            self.ribbon_builder.end_stroke();
            return;
        }

        let dab = Dab {
            pos,
            size: self.brush.dab_size(pressure),
        };
        self.engine.pen_move(dab, &mut self.pending_dabs);
        if self.brush.mode == BrushMode::Ribbon {
            for dab in self.pending_dabs.drain(..) {
                self.ribbon_builder.append(dab);
            }
        }
    }

    fn redraw(&mut self) {
        let st = match self.surface.get_current_texture() {
            Ok(st) => st,
            Err(err @ (SurfaceError::Outdated | SurfaceError::Lost)) => {
                log::debug!("surface error: {}", err);
                self.recreate_swapchain();
                self.surface
                    .get_current_texture()
                    .expect("failed to acquire next frame after recreating swapchain")
            }
            Err(e) => {
                panic!("failed to acquire frame: {}", e);
            }
        };

        self.update_cursor();
        self.canvas.set_position(&self.gpu, vec2(0.0, 0.0));

        let mut enc = self.gpu.device.create_command_encoder(&Default::default());

        // Bake the geometry synthesized since the last presentation onto the
        // persistent canvas. Skipped presentations only grow these queues,
        // they never drop dabs.
        let canvas_view = self.canvas.texture.create_view(&Default::default());
        match self.brush.mode {
            BrushMode::Stamped => {
                let instances: Vec<Instance> = self
                    .pending_dabs
                    .drain(..)
                    .map(|dab| Instance::new(dab.pos, vec2(dab.size, dab.size), 1.0))
                    .collect();
                self.stamps.set_instances(&self.gpu, &instances);

                let mut pass =
                    Pass::new(&self.gpu, &mut enc, &canvas_view, None, &self.canvas_pass);
                self.stamps.draw(&mut pass);
            }
            BrushMode::Ribbon => {
                self.ribbon
                    .set_vertices(&self.gpu, self.ribbon_builder.pending());
                self.ribbon_builder.clear_pending();

                let mut pass =
                    Pass::new(&self.gpu, &mut enc, &canvas_view, None, &self.canvas_pass);
                self.ribbon.draw(&mut pass);
            }
        }

        // Draw the canvas and cursor onto the window surface.
        let surface_view = st.texture.create_view(&Default::default());
        let mut pass = Pass::new(
            &self.gpu,
            &mut enc,
            &surface_view,
            Some(Color::TRANSPARENT),
            &self.surface_pass,
        );
        self.canvas.draw(&mut pass);
        self.cursor_draw.draw(&mut pass);
        drop(pass);

        self.gpu.queue.submit([enc.finish()]);
        self.window.pre_present_notify();
        st.present();
        self.clock.mark(Instant::now());
    }

    fn update_cursor(&mut self) {
        // (later: configure the right type of cursor)
        match self.cursor_pos {
            Some(pos) => self.cursor_draw.set_position(&self.gpu, pos),
            None => self.cursor_draw.clear(),
        }
    }
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Ok(Self {
            instance: wgpu::Instance::new(InstanceDescriptor {
                backends: Backends::PRIMARY,
                ..Default::default()
            }),
            win: None,
            config,
        })
    }

    fn create_win(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<Win> {
        let monitor = self.config.monitor.as_ref().and_then(|name| {
            let monitor = event_loop
                .available_monitors()
                .find(|m| m.name().as_deref() == Some(name.as_str()));
            if monitor.is_none() {
                log::warn!("monitor '{name}' not found, falling back to the primary monitor");
            }
            monitor
        });

        let window = Arc::new(
            event_loop.create_window(
                Window::default_attributes()
                    .with_window_level(WindowLevel::AlwaysOnTop)
                    .with_transparent(true)
                    .with_fullscreen(Some(Fullscreen::Borderless(monitor)))
                    .with_title("inklet"),
            )?,
        );
        window.set_cursor_hittest(false)?;

        let surface = self
            .instance
            .create_surface(SurfaceTarget::from(window.clone()))?;
        let res = window.inner_size();
        let gpu = Gpu::new(&self.instance, &surface, res.width, res.height)?;

        log::debug!(
            "creating canvas at {}x{}, format={:?}",
            res.width,
            res.height,
            gpu.format
        );
        let canvas = Drawable::empty(&gpu, res.width, res.height);
        let canvas_pass = PassUniforms::new(&gpu, vec2(res.width, res.height));
        let surface_pass = PassUniforms::new(&gpu, vec2(res.width, res.height));

        // The stamp texture: a soft radial falloff mask as premultiplied
        // white, so overlapping dabs accumulate into a continuous stroke.
        let mask: Vec<u8> = geometry::brush_mask()
            .iter()
            .flat_map(|&v| [v; 4])
            .collect();
        let stamps = Drawable::from_texture(
            &gpu,
            gpu.device.create_texture_with_data(
                &gpu.queue,
                &TextureDescriptor {
                    label: Some("brush"),
                    size: Extent3d {
                        width: BRUSH_MASK_SIZE,
                        height: BRUSH_MASK_SIZE,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: TextureFormat::Rgba8Unorm,
                    usage: TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                TextureDataOrder::MipMajor,
                &mask,
            ),
        );
        let cursor_draw = Drawable::from_texture(
            &gpu,
            gpu.device.create_texture_with_data(
                &gpu.queue,
                &TextureDescriptor {
                    label: Some("cursor"),
                    size: Extent3d {
                        width: 8,
                        height: 8,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: TextureFormat::Rgba8Unorm,
                    usage: TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                TextureDataOrder::MipMajor,
                &[0xff; 8 * 8 * 4],
            ),
        );
        let ribbon = Mesh::new(&gpu);

        let mut win = Win {
            window,
            surface,
            gpu,
            canvas,
            stamps,
            cursor_draw,
            ribbon,
            canvas_pass,
            surface_pass,
            cursor_pos: None,
            engine: StrokeEngine::new(self.config.brush.spacing),
            ribbon_builder: RibbonBuilder::new(),
            pending_dabs: Vec::new(),
            brush: self.config.brush,
            scale: self.config.scale,
            clock: FrameClock::new(self.config.render.framerate),
            last_pen: Instant::now(),
        };
        win.recreate_swapchain();
        Ok(win)
    }
}

impl ApplicationHandler<Cmd> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.win.is_none() {
            let win = match self.create_win(event_loop) {
                Ok(win) => win,
                Err(e) => {
                    eprintln!("could not create window: {e}");
                    process::exit(1);
                }
            };
            self.win = Some(win);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(win) = &mut self.win else { return };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.logical_key == Key::Named(NamedKey::Escape) {
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => win.redraw(),
            WindowEvent::Resized(_) => {
                win.recreate_swapchain();
                win.window.request_redraw();
            }
            _ => {}
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: Cmd) {
        let Some(win) = &mut self.win else { return };

        match event {
            Cmd::Clear => {
                log::info!("clearing canvas");
                let size = win.window.inner_size();
                win.canvas = Drawable::empty(&win.gpu, size.width, size.height);
                win.canvas_pass = PassUniforms::new(&win.gpu, vec2(size.width, size.height));
                win.window.request_redraw();
            }
            Cmd::PenMove {
                position,
                aspect_ratio: _a, // FIXME: we don't adjust for this yet
                pressure,
            } => {
                win.pen_move(position, pressure);

                // Input is consumed on every packet, but the swapchain only
                // presents at the configured framerate. If it isn't due yet,
                // schedule a wakeup so the accumulated dabs still get shown.
                let now = Instant::now();
                let deadline = if win.clock.due(now) {
                    win.window.request_redraw();
                    win.last_pen + OUT_OF_RANGE_TIMEOUT
                } else {
                    win.clock
                        .next_deadline(now)
                        .min(win.last_pen + OUT_OF_RANGE_TIMEOUT)
                };
                event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }
    }

    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        let Some(win) = &mut self.win else { return };
        match cause {
            StartCause::ResumeTimeReached { .. } => {
                let now = Instant::now();
                if now >= win.last_pen + OUT_OF_RANGE_TIMEOUT {
                    // There's no indication when the pen goes out of the
                    // detection range, so we use a timeout instead.
                    win.cursor_pos = None;
                    event_loop.set_control_flow(ControlFlow::default());
                } else {
                    event_loop.set_control_flow(ControlFlow::WaitUntil(
                        win.last_pen + OUT_OF_RANGE_TIMEOUT,
                    ));
                }
                win.window.request_redraw();
            }
            _ => {}
        }
    }
}

/// Decouples input sampling from presentation: packets are consumed as they
/// arrive, but the swapchain is presented at most once per frame interval.
struct FrameClock {
    time_per_frame: Duration,
    last_render: Option<Instant>,
}

impl FrameClock {
    fn new(framerate: u32) -> Self {
        Self {
            time_per_frame: Duration::from_secs(1) / framerate,
            last_render: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        match self.last_render {
            Some(last) => now >= last + self.time_per_frame,
            None => true,
        }
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        match self.last_render {
            Some(last) if !self.due(now) => last + self.time_per_frame,
            _ => now,
        }
    }

    fn mark(&mut self, now: Instant) {
        self.last_render = Some(now);
    }
}

#[derive(Clone, Copy, NoUninit)]
#[repr(C)]
struct Uniforms {
    render_target_size: Vec2u,
}

#[derive(Debug, Clone, Copy, NoUninit)]
#[repr(C)]
struct Instance {
    /// Center position in canvas coordinates.
    pos: Vec2f,
    /// Quad extent in pixels.
    size: Vec2f,
    opacity: f32,
    _padding: f32,
}

impl Instance {
    fn new(pos: Vec2f, size: Vec2f, opacity: f32) -> Self {
        Self {
            pos,
            size,
            opacity,
            _padding: 0.0,
        }
    }
}

struct Pass<'a> {
    gpu: &'a Gpu,
    pass: RenderPass<'a>,
}

impl<'a> Pass<'a> {
    fn new(
        gpu: &'a Gpu,
        enc: &'a mut CommandEncoder,
        target: &'a TextureView,
        clear: Option<Color>,
        uniforms: &'a PassUniforms,
    ) -> Self {
        let mut pass = enc.begin_render_pass(&RenderPassDescriptor {
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: if let Some(clear) = clear {
                        LoadOp::Clear(clear)
                    } else {
                        LoadOp::Load
                    },
                    ..Default::default()
                },
            })],
            ..Default::default()
        });
        pass.set_bind_group(0, &uniforms.bg, &[]);

        Self { gpu, pass }
    }
}

struct Drawable {
    texture: Texture,
    instance_buf: Buffer,
    texture_bg: BindGroup,
    instances_bg: BindGroup,
    instance_count: u32,
}

impl Drawable {
    fn empty(gpu: &Gpu, width: u32, height: u32) -> Self {
        let texture = gpu.device.create_texture(&TextureDescriptor {
            label: None,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: gpu.format,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self::from_texture(gpu, texture)
    }

    fn from_texture(gpu: &Gpu, texture: Texture) -> Self {
        let instance_buf = gpu.device.create_buffer(&BufferDescriptor {
            label: None,
            size: mem::size_of::<Instance>() as u64, // 1 instance preallocated
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let texture_bg = gpu.device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &gpu.texture_bgl,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&texture.create_view(&Default::default())),
            }],
        });
        let instances_bg = gpu.device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &gpu.instances_bgl,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer(instance_buf.as_entire_buffer_binding()),
            }],
        });

        Self {
            texture,
            instance_buf,
            texture_bg,
            instances_bg,
            instance_count: 0,
        }
    }

    fn clear(&mut self) {
        self.instance_count = 0;
    }

    fn set_position(&mut self, gpu: &Gpu, pos: Vec2f) {
        // Drawn as a single quad the size of the backing texture.
        let size = vec2(self.texture.width() as f32, self.texture.height() as f32);
        self.set_instances(gpu, &[Instance::new(pos, size, 1.0)]);
    }

    fn set_instances(&mut self, gpu: &Gpu, instances: &[Instance]) {
        let size = (mem::size_of::<Instance>() * instances.len()) as u64;
        if self.instance_buf.size() < size {
            self.instance_buf = gpu.device.create_buffer(&BufferDescriptor {
                label: None,
                size,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.instances_bg = gpu.device.create_bind_group(&BindGroupDescriptor {
                label: None,
                layout: &gpu.instances_bgl,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(self.instance_buf.as_entire_buffer_binding()),
                }],
            });
        }
        gpu.queue
            .write_buffer(&self.instance_buf, 0, bytemuck::cast_slice(instances));
        self.instance_count = instances.len() as u32;
    }

    fn draw<'a>(&'a self, p: &mut Pass<'a>) {
        p.pass.set_pipeline(&p.gpu.stamp_pipeline);
        p.pass.set_bind_group(1, &self.texture_bg, &[]);
        p.pass.set_bind_group(2, &self.instances_bg, &[]);
        p.pass.draw(0..4, 0..self.instance_count);
    }
}

/// A growable vertex buffer holding the ribbon triangle list.
struct Mesh {
    vertex_buf: Buffer,
    vertex_count: u32,
}

impl Mesh {
    fn new(gpu: &Gpu) -> Self {
        let vertex_buf = gpu.device.create_buffer(&BufferDescriptor {
            label: None,
            size: mem::size_of::<Vec2f>() as u64 * 6, // 1 quad preallocated
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            vertex_buf,
            vertex_count: 0,
        }
    }

    fn set_vertices(&mut self, gpu: &Gpu, vertices: &[Vec2f]) {
        let size = (mem::size_of::<Vec2f>() * vertices.len()) as u64;
        if self.vertex_buf.size() < size {
            self.vertex_buf = gpu.device.create_buffer(&BufferDescriptor {
                label: None,
                size,
                usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        }
        gpu.queue
            .write_buffer(&self.vertex_buf, 0, bytemuck::cast_slice(vertices));
        self.vertex_count = vertices.len() as u32;
    }

    fn draw<'a>(&'a self, p: &mut Pass<'a>) {
        p.pass.set_pipeline(&p.gpu.ribbon_pipeline);
        p.pass.set_vertex_buffer(0, self.vertex_buf.slice(..));
        p.pass.draw(0..self.vertex_count, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_gates_presentation() {
        let mut clock = FrameClock::new(100);
        let t0 = Instant::now();

        // The first frame is always due.
        assert!(clock.due(t0));

        clock.mark(t0);
        assert!(!clock.due(t0 + Duration::from_millis(5)));
        assert!(clock.due(t0 + Duration::from_millis(10)));
        assert!(clock.due(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn frame_clock_deadline_is_one_interval_after_mark() {
        let mut clock = FrameClock::new(100);
        let t0 = Instant::now();
        clock.mark(t0);

        let now = t0 + Duration::from_millis(5);
        assert_eq!(clock.next_deadline(now), t0 + Duration::from_millis(10));

        // Once due, there is nothing left to wait for.
        let late = t0 + Duration::from_millis(20);
        assert_eq!(clock.next_deadline(late), late);
    }
}
