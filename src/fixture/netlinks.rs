use crate::Args;

/// Three hosts in a line: A - B - C.
pub mod abc {
    use rand::{thread_rng, Rng};

    use super::*;

    pub struct ABCNet {
        pub a: Args,
        pub b: Args,
        pub c: Args,
    }

    impl ABCNet {
        fn load_default() -> ABCNet {
            Self {
                a: Args::parse_from_path("./net_links/abc/A.lnx").unwrap(),
                b: Args::parse_from_path("./net_links/abc/B.lnx").unwrap(),
                c: Args::parse_from_path("./net_links/abc/C.lnx").unwrap(),
            }
        }

        fn into_shuffled(self) -> ABCNet {
            let mut args = [self.a, self.b, self.c];

            Self::replace_ports(&mut args);

            let [a, b, c] = args;
            ABCNet { a, b, c }
        }

        /// Move every host to a random port so tests can run side by side.
        fn replace_ports(args: &mut [Args]) {
            let mut rng = thread_rng();
            let mut replacements = Vec::new();
            for arg in args.iter_mut() {
                let old = arg.host_port;
                let new = rng.gen_range(1024..65535);
                arg.host_port = new;
                replacements.push((old, new));
            }

            for arg in args {
                for link in &mut arg.links {
                    if let Some((_, new)) = replacements.iter().find(|(old, _)| link.remote_port == *old) {
                        link.remote_port = *new;
                    }
                }
            }
        }
    }

    pub fn load() -> ABCNet {
        ABCNet::load_default()
    }

    pub fn gen_unique() -> ABCNet {
        ABCNet::load_default().into_shuffled()
    }
}
